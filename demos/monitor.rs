use std::env;
use std::time::Duration;

use xcc_client::{EntityState, Event, XccClient};

#[tokio::main]
async fn main() -> xcc_client::Result<()> {
    tracing_subscriber::fmt::init();

    let args: Vec<String> = env::args().collect();
    let Some(host) = args.get(1) else {
        eprintln!("usage: monitor <host> [username] [password]");
        std::process::exit(2);
    };
    let username = args.get(2).map(String::as_str).unwrap_or("xcc");
    let password = args.get(3).map(String::as_str).unwrap_or("xcc");

    let mut client = XccClient::builder(host)
        .credentials(username, password)
        .on_event(|event| match event {
            Event::StateChanged { id, old, new, .. } => println!("{id}: {old:?} -> {new:?}"),
            Event::EntityAdded { id, kind, device } => println!("+ {id} ({kind:?}, {device})"),
            Event::EntityRemoved { id } => println!("- {id}"),
        })
        .build()?;

    println!("Connecting to {host}...");
    let entities = client.refresh().await?;
    for entity in entities.values() {
        let state = match &entity.state {
            EntityState::Number(n) => format!("{n}"),
            EntityState::Bool(b) => format!("{b}"),
            EntityState::Text(t) => t.clone(),
            EntityState::None => "-".to_string(),
        };
        let unit = entity.attributes.unit.as_deref().unwrap_or("");
        println!("[{}] {} = {state} {unit}", entity.device, entity.name);
    }

    loop {
        tokio::time::sleep(Duration::from_secs(30)).await;
        if let Err(e) = client.refresh().await {
            eprintln!("Refresh error: {e}");
        }
    }
}
