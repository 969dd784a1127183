//! Domain types shared by both endpoint roles.
//!
//! - **`identity`** – [`ConnectionId`](identity::ConnectionId), the stable
//!   token naming one open socket.
//! - **`state`** – [`LinkState`](state::LinkState), the endpoint's
//!   connect/disconnect state machine.

pub mod identity;
pub mod state;
