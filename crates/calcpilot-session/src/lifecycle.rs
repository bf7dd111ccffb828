//! Session lifecycle hooks
//!
//! The spreadsheet application is started and stopped by the user. These
//! hooks only check reachability and mark the end of a run.

use calcpilot_core::Result;
use tracing::{debug, warn};

use crate::protocol::PROTOCOL_VERSION;
use crate::session::CalcSession;

/// Instructions for starting the spreadsheet bridge by hand
///
/// The session endpoint speaks the calcpilot JSONL bridge protocol. The
/// spreadsheet application's own UNO socket (`soffice --accept=...;urp;`)
/// speaks binary URP and never answers the handshake.
pub fn manual_start_hint(endpoint: &str) -> String {
    format!(
        "No calcpilot bridge answered on {endpoint}.\n\
         The session endpoint must be a calcpilot bridge: a service that accepts \
         newline-delimited JSON requests (protocol v{PROTOCOL_VERSION}, starting with a \
         \"hello\" handshake) and applies them to the document open in the \
         spreadsheet application.\n\
         1. Start the spreadsheet application and open or focus a spreadsheet document.\n\
         2. Start the bridge listening on {endpoint} (or set [session] endpoint in \
         .calcpilot/config.toml to where it listens).\n\
         3. Run 'calcpilot doctor' to check the handshake, then run calcpilot again.\n\
         A plain UNO socket acceptor (soffice --accept=\"socket,...;urp;\") speaks a \
         binary protocol and will not work as the endpoint."
    )
}

/// Ping the session, logging start instructions when it does not answer
pub async fn check_connection<S: CalcSession + ?Sized>(session: &S) -> Result<()> {
    match session.ping().await {
        Ok(()) => {
            debug!("Session at {} is reachable", session.endpoint());
            Ok(())
        }
        Err(e) => {
            warn!("Session at {} is not reachable: {}", session.endpoint(), e);
            warn!("{}", manual_start_hint(session.endpoint()));
            Err(e)
        }
    }
}

/// End-of-run hook. The session stays open for the user.
pub fn release_session<S: CalcSession + ?Sized>(session: &S) {
    debug!(
        "Leaving session at {} running; it is managed manually",
        session.endpoint()
    );
}
