//! Cancellable blocking socket layer (§4.2): address parsing, cancellation
//! tokens, TLS context construction, and the stream handle built on both.

pub mod addr;
pub mod cancel;
pub mod stream;
pub mod tls;

pub use addr::Addr;
pub use cancel::{CancellationToken, Shutdownable};
pub use stream::{CancellableStream, Listener, RawStream};
pub use tls::{ClientVerify, create_client_tls_context, create_server_tls_context, server_name};
