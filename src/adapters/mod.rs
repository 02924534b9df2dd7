//! External system integrations for geosync.
//!
//! - [`store`] - the [`store::FeatureStore`] abstraction and an in-memory implementation
//! - [`postgis`] - PostgreSQL + PostGIS feature store
//! - [`remote`] - data service client (bulk exports and WFS changesets)
//!
//! # Design Pattern
//!
//! Adapters follow the **Adapter Pattern** to isolate external dependencies and
//! enable testing with mock implementations. The sync core only sees the
//! traits; `main` wires in the real implementations.
//!
//! ```rust,no_run
//! use geosync::adapters::remote::RemoteClient;
//! use geosync::config::{secret_string, RemoteConfig};
//!
//! # fn example() -> geosync::domain::Result<()> {
//! let config = RemoteConfig {
//!     api_key: secret_string("my-key".to_string()),
//!     api_url: "https://data.linz.govt.nz/services/api/v1.x/".to_string(),
//!     wfs_url: "https://data.linz.govt.nz/services/wfs".to_string(),
//!     timeout_seconds: 60,
//!     connect_timeout_seconds: 30,
//!     http_proxy: None,
//!     https_proxy: None,
//! };
//!
//! let client = RemoteClient::new(config)?;
//! # Ok(())
//! # }
//! ```

pub mod postgis;
pub mod remote;
pub mod store;
