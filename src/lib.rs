//! orbitctl: a PaaS deployment orchestration control plane. Owns the
//! declared-state-to-observed-state reconciliation loop for services, the
//! build queue, usage budgeting, multi-region traffic, and the outbound
//! webhook fan-out. The concrete cluster manager a deployment targets is out
//! of scope (SPEC_FULL §1); this crate speaks to it only through the
//! `OrchestratorGateway` trait.

pub mod budget;
pub mod build_executor;
pub mod build_queue;
pub mod config;
pub mod error;
pub mod events;
pub mod gateway;
pub mod health;
pub mod model;
pub mod multi_region;
pub mod reconciler;
pub mod traffic;
pub mod webhook_dispatcher;
