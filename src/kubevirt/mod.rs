pub mod client;
pub mod connectivity;
pub mod fetcher;
pub mod resolver;
pub mod resources;
pub mod services;

pub use client::{ClientError, ClientFactory, KubeClientFactory};
pub use fetcher::{FetchedData, fetch_objects};
pub use resolver::populate_inventory;
pub use resources::ObjectIdentity;
