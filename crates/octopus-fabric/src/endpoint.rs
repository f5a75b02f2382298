//! URL building for the HTTP backends.

use url::Url;

use crate::error::FabricError;

/// `base` with `segments` appended to its path. Each segment is
/// percent-encoded on its own, so a `/`, `?` or `#` inside a topic name
/// stays part of that segment, and bare `.` or `..` segments are skipped.
pub(crate) fn endpoint(base: &Url, segments: &[&str]) -> Result<Url, FabricError> {
    let mut url = base.clone();
    url.path_segments_mut()
        .map_err(|_| FabricError::OpaqueUrl(base.to_string()))?
        .pop_if_empty()
        .extend(segments);
    Ok(url)
}
