//! Routewise Core Library
//!
//! This crate provides the core functionality for Routewise, including:
//! - Arm registry and capability filtering
//! - Bandit policies (Thompson Sampling, UCB1, UCB-Normal, Discounted UCB, Bernstein UCB)
//! - Preference learning over observed metrics
//! - Cost-quality optimization under budgets
//! - Cost models and daily spend tracking
//! - SQLite persistence of learned state
//! - Configuration with file persistence

pub mod config;
pub mod cost;
pub mod error;
pub mod routing;

pub use error::{Error, Result};

/// Re-export commonly used types
pub mod prelude {
    pub use crate::config::Config;
    pub use crate::error::{Error, Result};
    pub use crate::routing::{
        Arm, Budget, Observation, Router, RouterBuilder, RouterConfig, RoutingContext,
        RoutingDecision,
    };
}
