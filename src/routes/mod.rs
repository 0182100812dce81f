/// Router Module Index
///
/// Organizes routing by who may call each endpoint. Access control is attached at
/// the router level with `route_layer`, never inside handlers, so an endpoint cannot
/// be exposed without its scheme by accident.

/// Routes accessible to any client (greeting, proxy).
pub mod public;

/// Content CRUD, mounted once per API version with that version's authenticator.
pub mod content;

/// Session-token lifecycle for the cookie-based API version.
pub mod session;

/// Operational endpoints served on the separate metrics port.
pub mod internal;
