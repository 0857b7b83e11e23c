//! Administrative CLI (spec §6): add/delete slice, add/update/close
//! reservation, list by (slice, state, type). Runs against a
//! `KernelProxy` so it can be issued from a separate thread/process
//! boundary from the dispatcher itself.

use clap::Subcommand;
use uuid::Uuid;

use crate::error::Error;
use crate::id::{ActorId, Id, ReservationId, SliceId};
use crate::kernel::KernelProxy;
use crate::model::{ResourceSet, ResourceType};
use crate::reservation::Reservation;
use crate::slice::SliceKind;
use crate::time::Term;

#[derive(Debug, Subcommand)]
pub enum AdminCommand {
    /// Registers a new slice owned by this actor.
    AddSlice { name: String, project_id: String, kind: String },
    /// Lists every slice this actor owns.
    ListSlices,
    /// Issues a new client ticket request.
    AddReservation {
        slice_id: String,
        broker: String,
        authority: String,
        units: u64,
        resource_type: String,
        start_millis: i64,
        end_millis: i64,
    },
    /// Requests a resize of an active lease's resources.
    UpdateReservation { reservation_id: String, units: u64, resource_type: String },
    /// Closes a reservation; idempotent on an already-closing one.
    CloseReservation { reservation_id: String },
    /// Lists reservations, optionally filtered by slice, state, and/or
    /// resource type.
    ListReservations { slice_id: Option<String>, state: Option<String>, resource_type: Option<String> },
}

/// Exit code classes for the administrative CLI: 0 success, distinct
/// non-zero codes per error class so a calling script can branch on
/// `$?` without parsing stderr.
pub fn exit_code(error: &Error) -> i32 {
    match error {
        Error::ReservationNotFound(_) | Error::DelegationNotFound(_) | Error::SliceNotFound(_) => 2,
        Error::InvalidArgument(_) | Error::InvalidState { .. } | Error::InvalidSliceTransition(_) | Error::InvalidTerm(_) => 3,
        Error::InsufficientResources(_) | Error::UnauthorizedPeer { .. } | Error::SequenceSmaller { .. } | Error::SequenceInProgress { .. } | Error::DuplicateRequest { .. } | Error::DuplicateReservation(_) => 4,
        Error::NetworkError(_) | Error::ProtocolError(_) | Error::NotSupported(_) | Error::Database(_) | Error::Config(_) | Error::Io(_) | Error::Deserialization(_) => 5,
    }
}

fn parse_id<T>(raw: &str, not_found: impl Fn(String) -> Error) -> Result<Id<T>, Error> {
    Uuid::parse_str(raw).map(Id::from_uuid).map_err(|_| not_found(raw.to_string()))
}

fn parse_slice_kind(raw: &str) -> Result<SliceKind, Error> {
    match raw {
        "client" => Ok(SliceKind::Client),
        "broker-client" => Ok(SliceKind::BrokerClient),
        "inventory" => Ok(SliceKind::Inventory),
        other => Err(Error::InvalidArgument(format!("unknown slice kind '{}' (expected client|broker-client|inventory)", other))),
    }
}

/// Runs one administrative command against the dispatcher behind
/// `proxy`, printing a human-readable result to stdout and returning
/// the process exit code.
pub fn run(proxy: &KernelProxy, command: AdminCommand) -> i32 {
    let outcome = dispatch(proxy, command);
    match outcome {
        Ok(message) => {
            println!("{}", message);
            0
        }
        Err(e) => {
            eprintln!("error: {}", e);
            exit_code(&e)
        }
    }
}

fn dispatch(proxy: &KernelProxy, command: AdminCommand) -> Result<String, Error> {
    match command {
        AdminCommand::AddSlice { name, project_id, kind } => {
            let kind = parse_slice_kind(&kind)?;
            let id = proxy.call(move |d| {
                let owner = d.identity;
                d.add_slice(name.clone(), owner, project_id.clone(), kind)
            })?;
            Ok(format!("slice {} created", id))
        }
        AdminCommand::ListSlices => {
            let rows = proxy.call(|d| {
                d.registry()
                    .slice_ids()
                    .into_iter()
                    .filter_map(|id| d.registry().with_slice(id, |s| (id, s.name.clone(), s.state)).ok())
                    .collect::<Vec<_>>()
            });
            let body = rows.into_iter().map(|(id, name, state)| format!("{}\t{}\t{:?}", id, name, state)).collect::<Vec<_>>().join("\n");
            Ok(if body.is_empty() { "(no slices)".to_string() } else { body })
        }
        AdminCommand::AddReservation { slice_id, broker, authority, units, resource_type, start_millis, end_millis } => {
            let slice_id: SliceId = parse_id(&slice_id, Error::SliceNotFound)?;
            let broker: ActorId = parse_id(&broker, Error::InvalidArgument)?;
            let authority: ActorId = parse_id(&authority, Error::InvalidArgument)?;
            let start = chrono::DateTime::from_timestamp_millis(start_millis).ok_or_else(|| Error::InvalidArgument("start_millis out of range".into()))?;
            let end = chrono::DateTime::from_timestamp_millis(end_millis).ok_or_else(|| Error::InvalidArgument("end_millis out of range".into()))?;
            let term = Term::new(start, end);
            let resources = ResourceSet::new(units, ResourceType::new(resource_type));
            let id = proxy.call(move |d| d.ticket(slice_id, broker, authority, resources, term))?;
            Ok(format!("reservation {} ticketed", id))
        }
        AdminCommand::UpdateReservation { reservation_id, units, resource_type } => {
            let id: ReservationId = parse_id(&reservation_id, Error::ReservationNotFound)?;
            let resources = ResourceSet::new(units, ResourceType::new(resource_type));
            proxy.call(move |d| d.modify_lease(id, resources))?;
            Ok(format!("reservation {} modify requested", id))
        }
        AdminCommand::CloseReservation { reservation_id } => {
            let id: ReservationId = parse_id(&reservation_id, Error::ReservationNotFound)?;
            proxy.call(move |d| d.close(id))?;
            Ok(format!("reservation {} close requested", id))
        }
        AdminCommand::ListReservations { slice_id, state, resource_type } => {
            let slice_id = slice_id.map(|raw| parse_id::<crate::id::SliceTag>(&raw, Error::SliceNotFound)).transpose()?;
            let rows = proxy.call(move |d| list_reservations(d.registry(), slice_id));
            let rows: Vec<_> = rows
                .into_iter()
                .filter(|row| state.as_deref().map(|s| row.2.eq_ignore_ascii_case(s)).unwrap_or(true))
                .filter(|row| resource_type.as_deref().map(|t| row.3 == t).unwrap_or(true))
                .collect();
            let body = rows.into_iter().map(|(id, slice, state, rtype)| format!("{}\t{}\t{}\t{}", id, slice, state, rtype)).collect::<Vec<_>>().join("\n");
            Ok(if body.is_empty() { "(no reservations)".to_string() } else { body })
        }
    }
}

fn list_reservations(registry: &crate::kernel::Registry, slice_filter: Option<SliceId>) -> Vec<(ReservationId, SliceId, String, String)> {
    let ids = match slice_filter {
        Some(slice_id) => registry.with_slice(slice_id, |s| s.reservations()).unwrap_or_default(),
        None => registry.reservation_ids(),
    };
    ids.into_iter()
        .filter_map(|id| {
            registry
                .with_reservation(id, |r: &Reservation| {
                    let rtype = r.requested_resources.as_ref().map(|rs| rs.get_type().to_string()).unwrap_or_default();
                    (id, r.slice, format!("{:?}", r.state), rtype)
                })
                .ok()
        })
        .collect()
}
