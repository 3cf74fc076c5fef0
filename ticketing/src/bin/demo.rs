//! Ticketing Engine Demo
//!
//! Drives the in-memory engine through a sold-out sale:
//! - An organizer registers an event with a small general admission allocation
//! - Many buyers race for the seats concurrently; nobody is oversold
//! - A winner lists a ticket at the resale cap and another buyer takes it
//! - The organizer checks the ticket in, and a second scan is refused
//!
//! # Usage
//!
//! ```bash
//! TICKETING_DEMO_BUYERS=200 TICKETING_DEMO_CAPACITY=25 cargo run --bin demo
//! ```

use futures::future::join_all;
use std::sync::Arc;
use ticketing::{
    Config, Currency, Event, IdentityId, InMemoryDirectory, InMemoryResalePublisher, Money, Principal,
    PurchaseId, PurchaseRequest, TicketType, TicketingEngine, TicketingError,
};
use ticketing_core::SystemClock;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Initialize tracing
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info,ticketing=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    ticketing::metrics::register_business_metrics();

    let config = Config::from_env();
    let buyers = config.demo.buyers;
    let capacity = config.demo.capacity;

    println!("\n🎫 ============================================");
    println!("   Ticketing Engine - Live Demo");
    println!("============================================\n");

    let directory = InMemoryDirectory::new();
    let publisher = InMemoryResalePublisher::default();
    let engine = TicketingEngine::builder()
        .config(config)
        .clock(Arc::new(SystemClock))
        .directory(Arc::new(directory.clone()))
        .resale_publisher(Arc::new(publisher.clone()))
        .build();

    // Step 1: Register the event
    let organizer = Principal::organizer(IdentityId::new());
    let general = TicketType::new("General Admission", Money::from_minor(5_000), Currency::usd(), capacity);
    let general_id = general.id;
    let event = engine
        .register_event(&organizer, Event::new("Summer Music Festival", organizer.identity), vec![general])
        .await?;
    println!("1️⃣  Registered '{}' with {capacity} seats", event.name);

    // Step 2: Everyone tries to buy one seat at the same time
    let mut principals = Vec::new();
    for n in 0..buyers {
        let identity = IdentityId::new();
        let email = format!("fan{n}@example.com");
        directory.register(identity, format!("Fan {n}"), Some(email.as_str()))?;
        principals.push(Principal::buyer(identity));
    }

    let attempts = principals.iter().map(|buyer| {
        let engine = engine.clone();
        let request = PurchaseRequest::new(PurchaseId::generate(), event.id, general_id, 1, *buyer);
        async move { engine.purchase(request).await }
    });
    let results = join_all(attempts).await;

    let mut winners = Vec::new();
    let mut sold_out = 0;
    for result in results {
        match result {
            Ok(outcome) => winners.extend(outcome.tickets),
            Err(TicketingError::Ledger(_)) => sold_out += 1,
            Err(other) => return Err(other.into()),
        }
    }
    let remaining = engine.availability(event.id).await?;
    println!(
        "2️⃣  {buyers} buyers raced: {} got tickets, {sold_out} were sold out, sold counter = {}",
        winners.len(),
        remaining.first().map_or(0, |ticket_type| ticket_type.sold)
    );

    let Some(ticket) = winners.first().cloned() else {
        println!("   Nobody got a ticket; nothing more to show.");
        return Ok(());
    };

    // Step 3: Resale at the cap
    let seller = Principal::buyer(ticket.owner);
    let cap = ticket.original_price().cap(engine.config().limits.resale_cap_percent);
    let over_cap = Money::from_minor(cap.minor().saturating_add(1));
    if let Err(error) = engine.list_for_resale(ticket.id, &seller, over_cap).await {
        println!("3️⃣  Listing at {over_cap} refused: {error}");
    }
    engine.list_for_resale(ticket.id, &seller, cap).await?;
    println!("   Listed at the cap of {cap}");

    let late_fan = Principal::buyer(IdentityId::new());
    let resold = engine.purchase_resale(ticket.id, &late_fan).await?;
    println!(
        "   Resold to the late fan; history has {} entr{}",
        resold.transfer_history.len(),
        if resold.transfer_history.len() == 1 { "y" } else { "ies" }
    );

    // Step 4: Check-in
    engine.validate(ticket.id, &organizer).await?;
    println!("4️⃣  Ticket checked in at gate A");
    match engine.validate(ticket.id, &organizer).await {
        Err(error) => println!("   Gate B scan refused: {error}"),
        Ok(_) => println!("   Gate B scan unexpectedly admitted the ticket"),
    }

    println!(
        "\n📣 Resale notifications published: {}",
        publisher.published().len()
    );
    println!("✓ Demo complete\n");
    Ok(())
}
