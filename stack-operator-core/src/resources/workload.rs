/// Floating tags have to be pulled on every start to pick up new builds.
pub fn image_pull_policy(version: &str) -> String {
    match version {
        "" | "latest" => "Always",
        _ => "IfNotPresent",
    }
    .to_owned()
}
