use std::collections::BTreeMap;

pub const RELOADER_ANNOTATION: &str = "reloader.stakater.com/auto";

pub fn get_reloader_annotations() -> BTreeMap<String, String> {
    BTreeMap::from([(RELOADER_ANNOTATION.to_owned(), "true".to_owned())])
}
