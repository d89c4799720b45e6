use std::collections::BTreeMap;

pub const CRASH_DUMP_PREFIX: &str = "threadkeeper";
pub const DETACHED_KEY: &str = "__detached__";

#[must_use]
pub fn sanitize_timestamp_for_filename(timestamp: &str) -> String {
    timestamp
        .chars()
        .map(|c| match c {
            ':' | '/' | '\\' | ' ' => '-',
            _ => c,
        })
        .collect()
}

#[must_use]
pub fn crash_dump_file_name(timestamp: &str) -> String {
    format!(
        "{CRASH_DUMP_PREFIX}-{}.json",
        sanitize_timestamp_for_filename(timestamp)
    )
}

/// Key under which the detached thread is stored in a crash dump, numbered
/// past any named thread that already uses it.
#[must_use]
pub fn detached_dump_key<V>(named: &BTreeMap<String, V>) -> String {
    let mut key = DETACHED_KEY.to_string();
    let mut counter = 1;
    while named.contains_key(&key) {
        counter += 1;
        key = format!("{DETACHED_KEY}{counter}");
    }
    key
}

#[cfg(test)]
mod tests {
    use std::collections::BTreeMap;

    use super::{crash_dump_file_name, detached_dump_key};

    #[test]
    fn crash_dump_name_is_filesystem_safe() {
        assert_eq!(
            crash_dump_file_name("2026-02-14T09:30:00Z"),
            "threadkeeper-2026-02-14T09-30-00Z.json"
        );
    }

    #[test]
    fn detached_key_avoids_named_threads() {
        let mut named = BTreeMap::new();
        assert_eq!(detached_dump_key(&named), "__detached__");

        named.insert("__detached__".to_string(), ());
        named.insert("__detached__2".to_string(), ());
        assert_eq!(detached_dump_key(&named), "__detached__3");
    }
}
