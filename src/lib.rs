pub mod relay;

pub use relay::{
    config::{Delivery, RelayConfig},
    error::Error,
    Relay, RelayHandle,
};
