pub mod bank;
pub mod data;
pub mod exam;
pub mod notebook;
pub mod progress;
pub mod settings;
pub mod sync;
pub mod wrong;

use anyhow::Result;
use serde::Serialize;

pub fn print_json<T: Serialize + ?Sized>(value: &T) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}
