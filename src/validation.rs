use std::path::Path;

use log::{debug, info};

use mdcreate_api::{
    config::ArrayCreateRequest,
    error::{InternalError, MdError, PreconditionError, ReportError},
    primitives::size::KibCount,
};
use sysdefs::raid::{Raid5Layout, RaidLevel};

use crate::create::{self, CreateParameters};

/// Checks an array request file without touching any device, and prints the
/// request with defaults filled in.
pub fn validate_request_file(path: impl AsRef<Path>) -> Result<(), MdError> {
    info!("Validating array request file: {}", path.as_ref().display());

    let request = ArrayCreateRequest::from_file(path.as_ref())?;
    let normalized = validate_request(request)?;

    println!(
        "{}",
        serde_yaml::to_string(&normalized).structured(InternalError::Internal(
            "Failed to serialize array request"
        ))?
    );
    Ok(())
}

/// Resolves the parameters of `request` and returns it with the chosen
/// layout and chunk size written back.
fn validate_request(mut request: ArrayCreateRequest) -> Result<ArrayCreateRequest, MdError> {
    let CreateParameters {
        level,
        layout,
        chunk_kib,
        ..
    } = create::resolve_parameters(&request)
        .map_err(|e| MdError::new(PreconditionError::InvalidParameters(e)))?;

    if level == RaidLevel::Raid5 {
        request.layout = Raid5Layout::from_number(layout);
    }
    request.chunk = KibCount(chunk_kib);

    info!("Array request is valid");
    debug!("Resolved {level} with {} members", request.members.len());
    Ok(request)
}
