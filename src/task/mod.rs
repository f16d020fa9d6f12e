pub mod model;
pub mod poller;
pub mod relay;
pub mod request;
pub mod state;
pub mod store;
