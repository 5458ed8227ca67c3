//! # airstreamer
//!
//! Contrôle du moteur audio (liquidsoap) d'une station AirStation :
//!
//! - [`Connector`] : client du protocole ligne du socket de contrôle
//! - [`Source`] et ses variantes : playlists des programmes diffusés en
//!   continu, file du dealer, sortie master
//! - [`Streamer`] : script du moteur, playlists, état des sources et
//!   processus
//!
//! ```no_run
//! use airmodels::Store;
//! use airstreamer::{Streamer, StreamerSettings};
//!
//! let store = Store::open(std::path::Path::new("airstation.db"))?;
//! for station in store.stations()? {
//!     let mut streamer = Streamer::from_store(&store, station, StreamerSettings::default())?;
//!     streamer.make_config(&store)?;
//! }
//! # Ok::<(), airstreamer::Error>(())
//! ```

pub mod connector;
mod error;
pub mod metadata;
pub mod script;
pub mod source;
pub mod streamer;

#[cfg(feature = "airconfig")]
mod config_ext;

pub use connector::{Address, Connector};
pub use error::{Error, Result};
pub use metadata::{Metadata, Rid, Status};
pub use source::{
    select_on_air, MasterSource, PlaylistSource, QueueSource, Request, Source, SourceState,
};
pub use streamer::{Streamer, StreamerSettings};

#[cfg(feature = "airconfig")]
pub use config_ext::StreamerConfigExt;
