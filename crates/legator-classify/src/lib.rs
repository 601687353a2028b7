//! Legator Classify - Static, conservative command classification.
//!
//! Maps `(command, args)` to an [`ActionTier`] from closed lists. Anything
//! not recognized classifies as `remediate`, the highest probe-executable
//! tier, so an unknown command can never slip past an `observe` or
//! `diagnose` policy. The lists are intentionally closed: new commands are
//! added here explicitly, never inferred.
//!
//! Rules apply in order, first match wins:
//!
//! 1. remediate prefixes (mutating verbs, service lifecycle, firewalls)
//! 2. observe prefixes (read-only invocations of admin tools)
//! 3. observe command set (plain read-only commands)
//! 4. diagnose prefixes (active network/device probing)
//! 5. diagnose command set
//! 6. `remediate` default

#![deny(unsafe_code)]
#![warn(missing_docs)]
#![deny(clippy::all)]
#![warn(unreachable_pub)]
#![deny(clippy::unwrap_used)]
#![cfg_attr(test, allow(clippy::unwrap_used))]

use legator_core::ActionTier;

/// Prefixes that always mean mutation.
const REMEDIATE_PREFIXES: &[&str] = &[
    "rm ",
    "rmdir ",
    "mv ",
    "cp ",
    "chmod ",
    "chown ",
    "chgrp ",
    "ln ",
    "dd ",
    "mkfs",
    "truncate ",
    "shred ",
    "apt ",
    "apt-get ",
    "yum ",
    "dnf ",
    "pacman ",
    "zypper ",
    "apk add",
    "apk del",
    "pip install",
    "pip uninstall",
    "npm install",
    "npm uninstall",
    "systemctl start",
    "systemctl stop",
    "systemctl restart",
    "systemctl reload",
    "systemctl enable",
    "systemctl disable",
    "systemctl mask",
    "service ",
    "reboot",
    "shutdown",
    "halt",
    "poweroff",
    "init ",
    "iptables ",
    "ip6tables ",
    "nft ",
    "ufw ",
    "firewall-cmd ",
    "useradd",
    "userdel",
    "usermod",
    "groupadd",
    "groupdel",
    "passwd",
    "kill ",
    "killall ",
    "pkill ",
    "sed -i",
    "tee ",
    "crontab ",
    "mount -",
    "umount ",
    "swapoff",
    "swapon",
    "sysctl -w",
    "modprobe ",
    "rmmod ",
    "docker run",
    "docker rm",
    "docker stop",
    "docker kill",
    "docker restart",
    "git push",
    "git reset",
    "git checkout",
];

/// Read-only invocations of tools that can also mutate.
const OBSERVE_PREFIXES: &[&str] = &[
    "systemctl status",
    "systemctl list-",
    "systemctl show",
    "systemctl is-active",
    "systemctl is-enabled",
    "ip addr",
    "ip a",
    "ip link show",
    "ip route show",
    "ip -",
    "docker ps",
    "docker images",
    "docker logs",
    "docker inspect",
    "git status",
    "git log",
    "git diff",
    "git show",
    "git branch",
    "kubectl get",
    "kubectl describe",
    "kubectl logs",
    "apt list",
    "apt-cache ",
    "dpkg -l",
    "rpm -q",
    "sysctl -a",
    "sysctl net",
];

/// Plain read-only commands.
const OBSERVE_COMMANDS: &[&str] = &[
    "ls", "cat", "head", "tail", "grep", "wc", "stat", "file", "ps", "top", "htop", "free",
    "uptime", "uname", "hostname", "date", "id", "whoami", "who", "w", "env", "printenv", "echo",
    "pwd", "df", "du", "journalctl", "dmesg", "last", "lsblk", "lscpu", "lsmem", "lsusb", "lspci",
    "netstat", "ss", "which", "whereis", "type", "find", "locate", "history", "sort", "uniq",
    "cut", "tr", "basename", "dirname", "readlink", "md5sum", "sha256sum", "true", "false",
];

/// Prefixes that probe the network or devices without mutating them.
const DIAGNOSE_PREFIXES: &[&str] = &["curl", "wget", "fdisk -l", "mount"];

/// Plain diagnostic commands.
const DIAGNOSE_COMMANDS: &[&str] = &[
    "dig", "nslookup", "host", "traceroute", "tracepath", "mtr", "ping", "ping6", "tcpdump",
    "strace", "ltrace", "lsof", "nc", "ncat", "arp", "ethtool", "smartctl", "iostat", "vmstat",
    "mpstat", "sar", "nmap",
];

/// Classify a command line into its action tier.
///
/// `args` are joined onto `command` with single spaces before prefix
/// matching; the base command alone is checked against the command sets.
#[must_use]
pub fn classify(command: &str, args: &[String]) -> ActionTier {
    let full = if args.is_empty() {
        command.trim().to_string()
    } else {
        format!("{} {}", command.trim(), args.join(" "))
    };
    classify_line(&full)
}

/// Classify a pre-joined command line.
#[must_use]
pub fn classify_line(line: &str) -> ActionTier {
    let line = line.trim();
    let base = line.split_whitespace().next().unwrap_or_default();

    if REMEDIATE_PREFIXES
        .iter()
        .any(|p| line.starts_with(p) || line == p.trim_end())
    {
        return ActionTier::Remediate;
    }

    if OBSERVE_PREFIXES.iter().any(|p| line.starts_with(p)) {
        return ActionTier::Observe;
    }

    if OBSERVE_COMMANDS.contains(&base) {
        // find can delete or exec arbitrary commands.
        if base == "find" && (line.contains("-exec") || line.contains("-delete")) {
            return ActionTier::Remediate;
        }
        return ActionTier::Observe;
    }

    if DIAGNOSE_PREFIXES.iter().any(|p| line.starts_with(p)) {
        // wget with an output file writes to disk.
        if base == "wget" && (line.contains(" -o") || line.contains(" -O")) {
            return ActionTier::Remediate;
        }
        return ActionTier::Diagnose;
    }

    if DIAGNOSE_COMMANDS.contains(&base) {
        return ActionTier::Diagnose;
    }

    ActionTier::Remediate
}

#[cfg(test)]
mod tests {
    use super::*;

    fn args(list: &[&str]) -> Vec<String> {
        list.iter().map(ToString::to_string).collect()
    }

    #[test]
    fn test_remediate_prefixes() {
        assert_eq!(classify("rm", &args(&["-rf", "/tmp/x"])), ActionTier::Remediate);
        assert_eq!(classify("chmod", &args(&["600", "key"])), ActionTier::Remediate);
        assert_eq!(classify("systemctl", &args(&["restart", "nginx"])), ActionTier::Remediate);
        assert_eq!(classify("reboot", &[]), ActionTier::Remediate);
        assert_eq!(classify("iptables", &args(&["-F"])), ActionTier::Remediate);
        assert_eq!(classify("useradd", &args(&["eve"])), ActionTier::Remediate);
        assert_eq!(classify("apt-get", &args(&["install", "htop"])), ActionTier::Remediate);
    }

    #[test]
    fn test_observe_prefixes_beat_command_lookup() {
        assert_eq!(classify("systemctl", &args(&["status", "nginx"])), ActionTier::Observe);
        assert_eq!(classify("ip", &args(&["addr"])), ActionTier::Observe);
        assert_eq!(classify("docker", &args(&["ps", "-a"])), ActionTier::Observe);
        assert_eq!(classify("git", &args(&["log", "--oneline"])), ActionTier::Observe);
    }

    #[test]
    fn test_observe_commands() {
        for cmd in ["ls", "cat", "ps", "journalctl", "echo", "df", "uptime"] {
            assert_eq!(classify(cmd, &[]), ActionTier::Observe, "{cmd}");
        }
    }

    #[test]
    fn test_find_escalates_with_exec_or_delete() {
        assert_eq!(classify("find", &args(&["/tmp", "-name", "*.log"])), ActionTier::Observe);
        assert_eq!(
            classify("find", &args(&["/tmp", "-name", "*.log", "-delete"])),
            ActionTier::Remediate
        );
        assert_eq!(
            classify("find", &args(&["/", "-exec", "rm", "{}", ";"])),
            ActionTier::Remediate
        );
    }

    #[test]
    fn test_diagnose_prefixes() {
        assert_eq!(classify("curl", &args(&["https://example.com"])), ActionTier::Diagnose);
        assert_eq!(classify("wget", &args(&["https://example.com"])), ActionTier::Diagnose);
        assert_eq!(classify("fdisk", &args(&["-l"])), ActionTier::Diagnose);
        assert_eq!(classify("mount", &[]), ActionTier::Diagnose);
    }

    #[test]
    fn test_wget_output_escalates() {
        assert_eq!(
            classify("wget", &args(&["-O", "/usr/bin/tool", "https://x"])),
            ActionTier::Remediate
        );
        assert_eq!(
            classify("wget", &args(&["-o", "log.txt", "https://x"])),
            ActionTier::Remediate
        );
    }

    #[test]
    fn test_diagnose_commands() {
        for cmd in ["dig", "tcpdump", "strace", "lsof", "ping"] {
            assert_eq!(classify(cmd, &[]), ActionTier::Diagnose, "{cmd}");
        }
    }

    #[test]
    fn test_mount_with_args_is_remediate() {
        assert_eq!(
            classify("mount", &args(&["-t", "ext4", "/dev/sdb1", "/mnt"])),
            ActionTier::Remediate
        );
    }

    #[test]
    fn test_unknown_defaults_to_remediate() {
        for cmd in ["frobnicate", "bash", "python3", "perl", "sh", "./script.sh"] {
            assert_eq!(classify(cmd, &[]), ActionTier::Remediate, "{cmd}");
        }
    }
}
