//! Console commands for a running node
//!
//! Each stdin line is one command: a line containing an IPv4 address asks
//! the node to connect to it, `/status` prints the node status as JSON, and
//! anything else becomes the payload of a new transaction.

use crate::node::Node;
use log::{info, warn};
use std::net::{IpAddr, Ipv4Addr, SocketAddrV4, UdpSocket};
use tokio::io::{AsyncBufRead, AsyncBufReadExt};

/// Result type for CLI operations
pub type CliResult<T> = Result<T, Box<dyn std::error::Error>>;

/// Console line that prints the status snapshot
pub const STATUS_COMMAND: &str = "/status";

/// A parsed console line
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConsoleCommand {
    /// Connect to a peer (`ip` or `ip:port`)
    Connect(String),
    Status,
    /// Sign and submit a transaction with this payload
    Submit(Vec<u8>),
    Empty,
}

/// Find the first IPv4 address (optionally with a port) in `line`
pub fn find_ip_address(line: &str) -> Option<String> {
    line.split(|c: char| c.is_whitespace() || c == ',')
        .map(|token| token.trim_matches(|c: char| !c.is_ascii_alphanumeric()))
        .find(|token| token.parse::<SocketAddrV4>().is_ok() || token.parse::<Ipv4Addr>().is_ok())
        .map(str::to_string)
}

/// Classify one line of console input
pub fn parse_line(line: &str) -> ConsoleCommand {
    let trimmed = line.trim();
    if trimmed.is_empty() {
        return ConsoleCommand::Empty;
    }
    if trimmed == STATUS_COMMAND {
        return ConsoleCommand::Status;
    }
    match find_ip_address(trimmed) {
        Some(addr) => ConsoleCommand::Connect(addr),
        None => ConsoleCommand::Submit(trimmed.as_bytes().to_vec()),
    }
}

/// Read commands from `input` until it ends
pub async fn run_console<R>(node: &Node, input: R) -> CliResult<()>
where
    R: AsyncBufRead + Unpin,
{
    let mut lines = input.lines();
    while let Some(line) = lines.next_line().await? {
        match parse_line(&line) {
            ConsoleCommand::Empty => {}
            ConsoleCommand::Connect(addr) => {
                info!("Connection requested to {}", addr);
                node.connect(&addr).await?;
            }
            ConsoleCommand::Status => {
                let status = node.status().await?;
                println!("{}", serde_json::to_string_pretty(&status)?);
            }
            ConsoleCommand::Submit(payload) => match node.submit_payload(payload).await {
                Ok(signature) => println!("Transaction submitted: {}", signature.short_hex()),
                Err(e) => warn!("Failed to create transaction: {}", e),
            },
        }
    }
    info!("Console input closed");
    Ok(())
}

/// Best guess at the address other machines reach this one on.
///
/// Connecting a UDP socket sends nothing; it only selects the outgoing
/// interface.
pub fn detect_local_ip() -> Option<IpAddr> {
    let socket = UdpSocket::bind("0.0.0.0:0").ok()?;
    socket.connect("8.8.8.8:80").ok()?;
    socket.local_addr().ok().map(|addr| addr.ip())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_find_ip_address() {
        assert_eq!(find_ip_address("10.0.0.7"), Some("10.0.0.7".to_string()));
        assert_eq!(
            find_ip_address("connect to 192.168.1.20:9300 please"),
            Some("192.168.1.20:9300".to_string())
        );
        assert_eq!(
            find_ip_address("peer (10.1.2.3)."),
            Some("10.1.2.3".to_string())
        );
        assert_eq!(find_ip_address("hello world"), None);
        assert_eq!(find_ip_address("version 1.2.3"), None);
        assert_eq!(find_ip_address("999.1.1.1"), None);
    }

    #[test]
    fn test_parse_line() {
        assert_eq!(parse_line("   "), ConsoleCommand::Empty);
        assert_eq!(parse_line("/status"), ConsoleCommand::Status);
        assert_eq!(
            parse_line("10.0.0.2"),
            ConsoleCommand::Connect("10.0.0.2".to_string())
        );
        assert_eq!(
            parse_line(" pay bob 5 \n"),
            ConsoleCommand::Submit(b"pay bob 5".to_vec())
        );
    }
}
