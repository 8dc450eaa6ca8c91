//! Repository layer for data access

pub mod api_keys;
pub mod campaign_contacts;
pub mod campaign_logs;
pub mod campaigns;
pub mod contacts;
pub mod instances;
pub mod jobs;
pub mod leases;
pub mod phone_locks;
pub mod variants;

pub use campaign_contacts::{CampaignContactCounts, CampaignContactRepository};
pub use campaign_logs::CampaignLogRepository;
pub use campaigns::CampaignRepository;
pub use contacts::ContactRepository;
pub use instances::{InstanceFleetCounts, InstanceRepository};
pub use jobs::JobRepository;
pub use leases::LeaseRepository;
pub use phone_locks::PhoneLockRepository;
pub use variants::VariantRepository;

// API keys keep the trait shape consumed by the HTTP auth layer
pub use api_keys::ApiKeyRepository as ApiKeyRepositoryTrait;
pub use api_keys::DbApiKeyRepository;
