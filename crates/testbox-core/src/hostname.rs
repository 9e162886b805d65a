//! Sandbox hostname derivation.

/// Build the hostname a sandbox container runs under.
///
/// The first label of the worker host is prefixed with `testing-` and
/// suffixed with the process id and sandbox name, so containers from
/// different workers and processes never collide. For `worker.example.org`,
/// pid 4242 and `ci-1` this gives `testing-worker-4242-ci-1.example.org`.
pub fn sandbox_hostname(name: &str, host: &str, pid: u32) -> String {
    let (first, rest) = host.split_once('.').unwrap_or((host, ""));

    if rest.is_empty() {
        format!("testing-{first}-{pid}-{name}")
    } else {
        format!("testing-{first}-{pid}-{name}.{rest}")
    }
}
