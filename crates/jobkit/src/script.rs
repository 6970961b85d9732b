//! Shell fragments run inside the execution unit.
//!
//! The unit image carries the MQ client; `runmqsc -c` reaches the queue
//! manager through the connection details in its environment.

use crate::types::UnitScripts;

/// Render the readiness wait, apply loop and verification command.
pub fn render(queue_manager: &str, mount_path: &str, readiness_timeout_secs: u64) -> UnitScripts {
    let qm = quote(queue_manager);
    let dir = quote(mount_path);

    let readiness = format!(
        r#"deadline=$(( $(date +%s) + {readiness_timeout_secs} ))
until echo 'PING QMGR' | runmqsc -c {qm} >/dev/null 2>&1; do
  if [ "$(date +%s)" -ge "$deadline" ]; then
    echo "queue manager {queue_manager} not ready after {readiness_timeout_secs}s" >&2
    exit 1
  fi
  sleep 5
done
echo "queue manager {queue_manager} is ready""#
    );

    // Glob order is sorted; ConfigMap bookkeeping entries start with '..' and are skipped
    let apply = format!(
        r#"for f in {dir}/*; do
  [ -f "$f" ] || continue
  echo "applying $(basename "$f")"
  status=0
  runmqsc -c -e {qm} < "$f" || status=$?
  if [ "$status" -ne 0 ]; then
    echo "$(basename "$f") failed with exit code $status" >&2
    exit "$status"
  fi
done"#
    );

    let verify = format!("echo 'DISPLAY QMSTATUS ALL' | runmqsc -c {qm}");

    UnitScripts {
        readiness,
        apply,
        verify,
    }
}

/// Single-quote a value for POSIX sh.
fn quote(value: &str) -> String {
    format!("'{}'", value.replace('\'', r"'\''"))
}
