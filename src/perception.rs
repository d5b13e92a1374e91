use crate::dom::{SimplifiedDocument, simplify};
use crate::hands::{BrowserError, LiveView};

/// What to capture each cycle.
#[derive(Debug, Clone, Default)]
pub struct CaptureOptions {
    pub assign_ids: bool,
    /// Selector whose match count is reported as `jobs_found`.
    pub job_marker: Option<String>,
}

/// One cycle's view of the world, handed to the policy.
#[derive(Debug, Clone)]
pub struct Perception {
    pub document: SimplifiedDocument,
    pub jobs_found: Option<usize>,
}

/// Reads the live page and simplifies it. Always a fresh capture: the loop
/// needs to see the effect of its previous action.
pub async fn capture<V>(view: &V, options: &CaptureOptions) -> Result<Perception, BrowserError>
where
    V: LiveView + ?Sized,
{
    let markup = view.markup().await?;
    let document = simplify(&markup, options.assign_ids);
    let jobs_found = match &options.job_marker {
        Some(marker) => Some(view.count_matching(marker).await?),
        None => None,
    };
    Ok(Perception {
        document,
        jobs_found,
    })
}
