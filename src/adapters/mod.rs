pub mod management;
pub mod proxy_handler;
pub mod server;
pub mod upstream_client;

pub use management::{ManagementState, management_router};
pub use proxy_handler::{ProxyState, proxy_router};
pub use server::ArcSwapServer;
pub use upstream_client::UpstreamClientAdapter;
