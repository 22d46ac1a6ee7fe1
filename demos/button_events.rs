//! Example: Print button presses and LED changes from a panel.
//!
//! Usage: cargo run --example button_events -- 192.168.2.12

use std::sync::Arc;

use led_panel_bridge::{
    ButtonMapping, LedPanel, NoDevices, PanelConfig, PanelEvent, PressClassification,
};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    let ip = std::env::args().nth(1).unwrap_or_else(|| "192.168.2.12".to_string());

    let config = PanelConfig::builder()
        .ip(ip)
        .name("Demo Panel")
        .press_classification(PressClassification::timed())
        // Button 1 turns the LED blue from any mode, button 2 turns it red in blue mode
        .button_mapping(ButtonMapping::led(1, "any", "blue"))
        .button_mapping(ButtonMapping::led(2, "blue", "red"))
        .build();

    let mut panel = LedPanel::start(config, Arc::new(NoDevices));
    let mut events = panel.subscribe();

    tokio::spawn(async move {
        while let Ok(event) = events.recv().await {
            match event {
                PanelEvent::ButtonPressed { index, kind } => {
                    println!("Button {}: {} press", index + 1, kind);
                }
                PanelEvent::LightStateChanged(state) => {
                    println!(
                        "LED {} (hue {}, sat {}%, bri {}%)",
                        state.color, state.hue, state.saturation, state.brightness
                    );
                }
                PanelEvent::Reachability(reachable) => {
                    println!("Panel reachable: {reachable}");
                }
                other => println!("{other:?}"),
            }
        }
    });

    println!("Press Ctrl-C to stop");
    tokio::signal::ctrl_c().await?;

    let snapshot = panel.snapshot().await;
    println!("Final state: {} in mode {}", snapshot.color, snapshot.mode);
    panel.shutdown().await?;
    Ok(())
}
