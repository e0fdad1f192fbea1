/// Ports below this need the unprivileged-port sysctl on Linux
pub const FIRST_UNPRIVILEGED_PORT: u16 = 1024;

pub fn is_privileged(port: u16) -> bool {
    port < FIRST_UNPRIVILEGED_PORT
}

/// Lets a non-root process bind ports below 1024 (Linux 4.11+)
///
/// The setting does not survive a reboot, so it is applied on every start.
/// Exits with status 1 when it cannot be applied.
#[cfg(target_os = "linux")]
pub fn ensure_privileged_ports_disabled() {
    use colored::Colorize;
    use std::process::Command;

    println!("{}", "  ⚙  Linux: disabling privileged ports so we can bind below 1024".cyan());

    let status = Command::new("sudo")
        .args(["sysctl", "-w", "net.ipv4.ip_unprivileged_port_start=0"])
        .status();

    match status {
        Ok(status) if status.success() => {}
        Ok(status) => exit_with(&format!("sysctl exited with {}", status)),
        Err(e) => exit_with(&e.to_string()),
    }
}

#[cfg(not(target_os = "linux"))]
pub fn ensure_privileged_ports_disabled() {}

#[cfg(target_os = "linux")]
fn exit_with(reason: &str) -> ! {
    use colored::Colorize;

    eprintln!(
        "{} could not disable privileged ports ({}); cannot bind below {}",
        "✗ Error:".red().bold(),
        reason,
        FIRST_UNPRIVILEGED_PORT
    );
    std::process::exit(1);
}
