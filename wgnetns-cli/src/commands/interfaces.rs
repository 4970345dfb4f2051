//! Interfaces command implementation

use anyhow::{Context, Result};
use wgnetns_core::ProcessId;
use wgnetns_namespace::{NamespaceInfo, interfaces_for_pid};

pub fn execute(pid: ProcessId) -> Result<()> {
    let namespaces = NamespaceInfo::for_pid(pid).context("Failed to get namespace information")?;
    let interfaces = interfaces_for_pid(pid).context("Failed to list interfaces")?;

    println!("\n🔒 Network namespace of PID {pid}");
    println!("{:-<60}", "");
    print!("{namespaces}");
    println!("{:-<60}", "");

    for name in &interfaces {
        println!("  {name}");
    }
    println!("Total: {} interface(s)", interfaces.len());

    Ok(())
}
