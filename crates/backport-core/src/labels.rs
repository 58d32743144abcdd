//! Label naming: `<prefix><branch>`.

/// Branch encoded in `label`, if it carries `prefix`.
pub fn target_branch_from_label(label: &str, prefix: &str) -> Option<String> {
    label
        .strip_prefix(prefix)
        .filter(|branch| !branch.is_empty())
        .map(str::to_string)
}

pub fn label_for(prefix: &str, branch: &str) -> String {
    format!("{prefix}{branch}")
}

/// Every branch targeted by `labels` under `prefix`, in label order.
pub fn target_branches(labels: &[String], prefix: &str) -> Vec<String> {
    labels
        .iter()
        .filter_map(|label| target_branch_from_label(label, prefix))
        .collect()
}
