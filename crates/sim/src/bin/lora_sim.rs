//! LoRa face simulation

use anyhow::Result;
use colored::Colorize;
use ndn_lora_sim::{scenarios, SimulationPresets};

#[tokio::main]
async fn main() -> Result<()> {
    env_logger::init();

    println!("{}", "NDN over LoRa Simulation".bright_blue().bold());
    println!("{}", "========================".bright_blue());

    let presets = vec![
        ("Short Range (SF7, 500 kHz)", SimulationPresets::short_range()),
        ("Suburban (SF9, 125 kHz)", SimulationPresets::suburban()),
    ];

    for (name, config) in presets {
        println!("{}", format!("\n>>> Testing: {}", name).bright_green().bold());
        println!("Air rate: {} bps", config.bandwidth_bps);
        println!("Packet Loss: {}%", (config.packet_loss * 100.0) as u32);
        println!("MTU: {} bytes", config.mtu);

        scenarios::ping_test(config.clone(), 10).await?;
        scenarios::broadcast_test(config.clone(), 4, 5).await?;
        scenarios::fragmentation_test(config, &[100, 400, 1200]).await?;

        println!("{}", "Test complete!".bright_yellow());
        println!("{}", "-".repeat(50));
    }

    println!("{}", "\n>>> Testing: Long Range (SF12, 125 kHz)".bright_red().bold());
    let long_range = SimulationPresets::long_range();
    println!("Air rate: {} bps", long_range.bandwidth_bps);
    println!("Packet Loss: {}%", (long_range.packet_loss * 100.0) as u32);
    println!("\nNote: every frame spends seconds on the air");
    scenarios::ping_test(long_range.clone(), 3).await?;
    scenarios::fragmentation_test(long_range, &[400]).await?;

    println!("\n{}", "All simulations complete!".bright_green().bold());
    Ok(())
}
