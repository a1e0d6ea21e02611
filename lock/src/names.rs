//! Lock names for the server's cross-process critical sections.

/// Serializes resolution and persistence of one remote ActivityPub object.
pub fn ap_object_lock_name(uri: &str) -> String {
  format!("ap-object:{uri}")
}

/// Serializes the insert-or-update of one chart row.
pub fn chart_insert_lock_name(key: &str) -> String {
  format!("chart-insert:{key}")
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn names_are_namespaced() {
    assert_eq!(
      ap_object_lock_name("https://remote.example/notes/1"),
      "ap-object:https://remote.example/notes/1"
    );
    assert_eq!(chart_insert_lock_name("active-users:day"), "chart-insert:active-users:day");
  }
}
