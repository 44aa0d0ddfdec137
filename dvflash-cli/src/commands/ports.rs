//! Port listing command implementation.

use anyhow::Result;
use console::style;
use dvflash::{NativePortEnumerator, PortEnumerator, PortInfo};

fn port_json(port: &PortInfo) -> serde_json::Value {
    serde_json::json!({
        "name": port.name,
        "vid": port.vid,
        "pid": port.pid,
        "manufacturer": port.manufacturer,
        "product": port.product,
    })
}

/// List ports command implementation.
pub(crate) fn cmd_list_ports(json: bool) -> Result<()> {
    let ports = NativePortEnumerator::list_ports()?;

    if json {
        let ports: Vec<serde_json::Value> = ports.iter().map(port_json).collect();
        let output = serde_json::json!({
            "ok": true,
            "data": {
                "ports": ports,
            }
        });
        println!("{}", serde_json::to_string_pretty(&output)?);
        return Ok(());
    }

    eprintln!("{}", style("Available serial ports").bold().underlined());

    if ports.is_empty() {
        eprintln!("  {}", style("No serial ports found").dim());
        return Ok(());
    }

    for port in &ports {
        let vid_pid = match (port.vid, port.pid) {
            (Some(vid), Some(pid)) => format!(" ({vid:04X}:{pid:04X})"),
            _ => String::new(),
        };
        let product = port.product.as_deref().unwrap_or("");

        eprintln!(
            "  {} {}{} {}",
            style("•").dim(),
            style(&port.name).cyan(),
            vid_pid,
            style(product).dim()
        );
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_port_json_fields() {
        let value = port_json(&PortInfo {
            name: "/dev/ttyUSB0".to_string(),
            vid: Some(0x0403),
            pid: Some(0x6001),
            manufacturer: Some("FTDI".to_string()),
            product: None,
        });

        assert_eq!(value["name"], "/dev/ttyUSB0");
        assert_eq!(value["vid"], 0x0403);
        assert_eq!(value["manufacturer"], "FTDI");
        assert!(value["product"].is_null());
    }
}
