//! Reservation aggregate (spec §3/§4.3), split the way the original
//! splits `kernel/reservation.py`/`reservation_client.py`/
//! `reservation_server.py`: common fields and the single `transition`
//! entry point in `base`, client-only arcs in `client`, broker/authority
//! arcs in `server`.

pub mod base;
pub mod client;
pub mod server;
pub mod update_data;

pub use base::{ClientData, Reservation, ReservationCategory, ReservationRole, ServerData};
pub use client::ClientAction;
pub use server::ServerAction;
pub use update_data::UpdateData;
