// Filling `:param` path templates with percent-encoded values.

use syncore_core::{PathTemplate, RouteParams};
use url::Url;

use crate::error::Error;

/// Render `template`, encoding each value as a single path segment so a
/// value such as `a/b` cannot change the request path.
pub(crate) fn fill(
    template: &PathTemplate,
    params: impl IntoIterator<Item = (String, String)>,
) -> Result<String, Error> {
    let encoded = params
        .into_iter()
        .map(|(name, value)| {
            let segment = encode_segment(&name, &value)?;
            Ok((name, segment))
        })
        .collect::<Result<RouteParams, Error>>()?;
    template
        .render(&encoded)
        .map_err(|param| Error::MissingPathParam {
            template: template.to_string(),
            param,
        })
}

fn encode_segment(param: &str, value: &str) -> Result<String, Error> {
    // Dot segments are resolved by URL joining even when percent-encoded.
    if matches!(value, "." | "..") {
        return Err(Error::InvalidPathParam {
            param: param.to_owned(),
            value: value.to_owned(),
        });
    }
    let mut scratch = Url::parse("http://localhost/")?;
    {
        let mut segments = scratch
            .path_segments_mut()
            .map_err(|()| Error::InvalidPathParam {
                param: param.to_owned(),
                value: value.to_owned(),
            })?;
        segments.clear().push(value);
    }
    Ok(scratch.path().trim_start_matches('/').to_owned())
}
