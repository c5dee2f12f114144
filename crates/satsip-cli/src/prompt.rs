use anyhow::Result;
use dialoguer::{Confirm, Input};

/// Ask before sending money. Non-interactive runs proceed.
pub fn confirm_zap(non_interactive: bool, address: &str, amount_sats: u64) -> Result<bool> {
    if non_interactive {
        return Ok(true);
    }
    let confirmed = Confirm::new()
        .with_prompt(format!("Send {amount_sats} sats to {address}?"))
        .default(false)
        .interact()?;
    Ok(confirmed)
}

/// Prompt for a zap amount in sats.
pub fn prompt_amount(non_interactive: bool, default: u64) -> Result<u64> {
    if non_interactive {
        return Ok(default);
    }
    let amount: u64 = Input::new()
        .with_prompt("Amount (sats)")
        .default(default)
        .validate_with(|n: &u64| if *n == 0 { Err("must be at least 1 sat") } else { Ok(()) })
        .interact_text()?;
    Ok(amount)
}
