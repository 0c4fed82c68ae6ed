//! RDFox runner tests against a scripted stand-in for the RDFox shell.

mod runner_test;

use std::fs;
use std::os::unix::fs::PermissionsExt;
use std::path::PathBuf;
use std::sync::OnceLock;

/// Mimics the RDFox shell: `RDFox sandbox <dir> "exec <script>"`.
const FAKE_RDFOX: &str = r#"#!/bin/sh
[ "$1" = sandbox ] || { echo "unexpected mode: $1" >&2; exit 2; }
cd "$2" || exit 2
script="${3#exec }"
on_error=continue
failed=0

run() {
  case "$1" in
    "set on-error stop") on_error=stop ;;
    "endpoint start")
      echo "The REST endpoint was successfully started at port number/service name 12110" ;;
    "import "*)
      f="${1#import }"
      if [ -f "$f" ]; then
        echo "Adding data on file '$f'."
      else
        echo "File with name '$f' cannot be found."
        failed=1
      fi ;;
    "export "*)
      f="${1#export }"
      echo "<a> <b> <c> ." > "$f" ;;
    "exhaust memory")
      echo "An error occurred while executing the command:"
      echo "    exhaust memory"
      echo "    The server is out of memory."
      failed=1 ;;
    quit)
      echo "Bye."
      exit 0 ;;
    *) ;;
  esac
}

while IFS= read -r line || [ -n "$line" ]; do
  run "$line"
  if [ "$failed" = 1 ] && [ "$on_error" = stop ]; then
    echo "Script execution was stopped because 'on-error' is set to 'stop'."
    break
  fi
done < "$script"

while IFS= read -r line; do
  run "$line"
done
"#;

/// Path of the fake RDFox executable, written once per test binary.
pub fn fake_rdfox() -> String {
    static PATH: OnceLock<PathBuf> = OnceLock::new();
    PATH.get_or_init(|| {
        let dir = std::env::temp_dir().join(format!("fake-rdfox-{}", std::process::id()));
        fs::create_dir_all(&dir).unwrap();
        let path = dir.join("RDFox");
        fs::write(&path, FAKE_RDFOX).unwrap();
        fs::set_permissions(&path, fs::Permissions::from_mode(0o755)).unwrap();
        path
    })
    .to_string_lossy()
    .to_string()
}
