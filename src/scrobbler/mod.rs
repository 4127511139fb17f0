// Scrobbler module
// Client for the Last.fm web service and the pieces it is built from

pub mod completion;
pub mod error;
pub mod lastfm;
pub mod lastfm_auth;
pub mod signature;
pub mod track;
pub mod traits;
pub mod transport;

pub use completion::{ReplyContext, ReplyHandle};
pub use error::ApiError;
pub use lastfm::{ClientSettings, LastFmClient, RetryPolicy, SessionCheck};
pub use track::TrackInfo;
pub use traits::{HttpResponse, Transport, TransportError};
pub use transport::HttpTransport;
