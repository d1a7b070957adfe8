//! # Atrium Protocol
//!
//! The wire protocol stack shared by Atrium servers and clients: schema
//! definitions, the schema-driven binary codec, the action repository that
//! binds routing keys to 2-byte hashes, and the client-side session state
//! machine.
//!
//! Frame formats:
//!
//! - client to server: `[2 bytes action hash][payload per incoming schema]`
//! - server to client: `[2 bytes action hash][4 bytes sender id][payload
//!   per outgoing schema]`
//! - handshake (server to client): payload under the well-known sync
//!   schema carrying the room id, assigned actor id, action list and the
//!   JSON-encoded schema layouts
//! - handshake completion (client to server): sync-schema payload echoing
//!   the assigned actor id
//!
//! Schema hashes are assigned at definition time and distributed through
//! the handshake; nothing is persisted across process restarts.

mod actions;
mod codec;
mod schema;
mod session;
mod types;
mod value;

pub use actions::{ActionListError, ActionRepository};
pub use codec::{CodecError, ProtocolCodec};
pub use schema::{FieldType, ScalarType, Schema, SchemaError, SchemaRegistry};
pub use session::{ClientSession, SessionError, SessionEvent};
pub use types::{ActionHash, ActorId, IdParseError, SchemaHash};
pub use value::{Payload, Value};
