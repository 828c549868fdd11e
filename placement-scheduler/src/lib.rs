//! Placement Scheduler Library
//!
//! Decides where region replicas and leaders should live:
//! - Replica, namespace and merge checkers run on every region heartbeat
//! - Leader and storage balancers run in periodic loops
//! - The coordinator admits operators and hands their steps back to stores
//! - Filters, selectors and distinct scoring rank candidate stores

pub mod balancer;
pub mod checker;
pub mod config;
pub mod coordinator;
pub mod filter;
pub mod handler;
pub mod metrics;
pub mod namespace;
pub mod operator;
pub mod scoring;
pub mod selector;

// Re-export main types
pub use balancer::{LeaderBalancer, Scheduler, StorageBalancer};
pub use checker::{MergeChecker, NamespaceChecker, ReplicaChecker};
pub use config::{
    ConfigError, LabelConstraint, MetricsSettings, PlacementConfig, ReplicationConfig,
    ScheduleConfig,
};
pub use coordinator::Coordinator;
pub use handler::Handler;
pub use namespace::{Classifier, DefaultClassifier, DEFAULT_NAMESPACE};
pub use operator::{
    ChangePeerType, Operator, OperatorKind, OperatorPriority, OperatorStep, ScheduleCommand,
};
pub use scoring::distinct_score;
