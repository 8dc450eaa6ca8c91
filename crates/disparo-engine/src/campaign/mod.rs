//! Campaign module - lifecycle management and paced dispatch

mod dispatcher;
mod manager;
pub mod rotation;
pub mod schedule;
mod supervisor;
mod template;

pub use dispatcher::{campaign_lease_key, CampaignDispatcher};
pub use manager::{CampaignError, CampaignManager};
pub use rotation::NoInstanceReason;
pub use schedule::GateDecision;
pub use supervisor::EngineSupervisor;
pub use template::TemplateRenderer;
