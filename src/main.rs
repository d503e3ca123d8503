//! Stowage demo
//!
//! Walks through the business object runtime against an in-memory store:
//! identity-mapped loading, relationship navigation, collection edits,
//! composition rules and an atomic commit with a transaction log.
//!
//! Usage: `stowage-demo [config.toml]`. Without an argument the file named by
//! `STOWAGE_CONFIG` is used, falling back to the default configuration.

use anyhow::{Context, Result};
use std::sync::Arc;
use stowage_bo::{BoContext, InMemoryDataStore, Row, SelectQuery};
use stowage_core::{DataType, DeleteParentAction, PropValue, StowageConfig};
use stowage_schema::{ClassDef, ClassRegistry, OrderCriteria, PropDef, RelationshipDef};
use tracing_subscriber::{EnvFilter, FmtSubscriber};
use uuid::Uuid;

fn main() -> Result<()> {
    let config = load_config()?;

    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(config.logging.level.to_lowercase()));
    FmtSubscriber::builder()
        .with_env_filter(filter)
        .with_target(config.logging.with_target)
        .init();

    println!();
    println!("╔═══════════════════════════════════════════════════════════╗");
    println!("║   Stowage v{:<47}║", stowage_bo::VERSION);
    println!("║   Business object persistence walkthrough                 ║");
    println!("╚═══════════════════════════════════════════════════════════╝");
    println!();

    run(config)
}

fn load_config() -> Result<StowageConfig> {
    let path = std::env::args()
        .nth(1)
        .or_else(|| std::env::var("STOWAGE_CONFIG").ok());

    match path {
        Some(path) => StowageConfig::load_from_file(&path)
            .with_context(|| format!("loading configuration from {}", path)),
        None => {
            let mut config = StowageConfig::default();
            config.transaction_log.enabled = true;
            Ok(config)
        }
    }
}

fn registry() -> Result<ClassRegistry> {
    let person = ClassDef::new("Person")
        .with_prop(PropDef::new("ID", DataType::Integer).compulsory())
        .with_prop(PropDef::new("Surname", DataType::String).compulsory())
        .with_prop(PropDef::new("FirstName", DataType::String))
        .with_key(["ID"])
        .with_relationship(
            RelationshipDef::multiple("Addresses", "Address")
                .with_prop("ID", "PersonID")
                .composition()
                .on_delete(DeleteParentAction::DeleteRelated)
                .order_by(OrderCriteria::new().asc("Street")),
        );

    let address = ClassDef::new("Address")
        .with_object_id("AddressID")
        .with_prop(PropDef::new("PersonID", DataType::Integer))
        .with_prop(PropDef::new("Street", DataType::String).compulsory())
        .with_relationship(
            RelationshipDef::single("Owner", "Person")
                .with_prop("PersonID", "ID")
                .composition(),
        );

    Ok(ClassRegistry::from_classes([person, address])?)
}

fn seed(ctx: &BoContext, store: &InMemoryDataStore) -> Result<()> {
    let people = ctx.class("Person")?;
    for (id, surname) in [(1, "Smith"), (2, "Jones")] {
        let row: Row = [
            ("ID".to_string(), PropValue::Int(id)),
            ("Surname".to_string(), PropValue::from(surname)),
        ]
        .into_iter()
        .collect();
        store.seed(&people, row);
    }

    let addresses = ctx.class("Address")?;
    for (person, street) in [(1, "Main St"), (1, "High St"), (2, "Elm St")] {
        let row: Row = [
            ("AddressID".to_string(), PropValue::Guid(Uuid::new_v4())),
            ("PersonID".to_string(), PropValue::Int(person)),
            ("Street".to_string(), PropValue::from(street)),
        ]
        .into_iter()
        .collect();
        store.seed(&addresses, row);
    }
    Ok(())
}

fn run(config: StowageConfig) -> Result<()> {
    let store = Arc::new(InMemoryDataStore::new());
    let ctx = BoContext::with_config(registry()?, store.clone(), config);
    seed(&ctx, &store)?;

    // identity: two loads, one instance per row
    let loader = ctx.loader();
    let first = loader.load(&SelectQuery::new("Person"))?;
    let second = loader.load(&SelectQuery::new("Person"))?;
    let shared = first.iter().zip(&second).all(|(a, b)| a.ptr_eq(b));
    println!("Loaded {} people, same instances on reload: {}", first.len(), shared);

    let smith = loader
        .get_business_object_by_key("Person", &[("ID", PropValue::Int(1))])?
        .context("Smith was seeded")?;
    let jones = loader
        .get_business_object_by_key("Person", &[("ID", PropValue::Int(2))])?
        .context("Jones was seeded")?;

    let addresses = smith.get_related_collection("Addresses")?;
    println!("{} lives at:", smith.value("Surname")?);
    for address in addresses.iter() {
        println!("  - {}", address.value("Street")?);
    }

    // composition: an address owned by Jones cannot move to Smith
    let jones_address = jones
        .get_related_collection("Addresses")?
        .get(0)
        .context("Jones has an address")?;
    match addresses.add(&jones_address) {
        Ok(()) => println!("Unexpectedly moved {}", jones_address.key_string()),
        Err(e) => println!("Rejected: {}", e),
    }

    // edits tracked by the collection until SaveAll
    let created = addresses.create_business_object()?;
    created.set_property_value("Street", "Station Rd")?;
    smith.set_property_value("FirstName", "Jane")?;
    println!(
        "Pending: {} created, {} persisted, Smith dirty: {}",
        addresses.created().len(),
        addresses.persisted().len(),
        smith.is_dirty()
    );

    let mut committer = ctx.committer();
    committer.add_business_object(&smith);
    for member in addresses.iter() {
        committer.add_business_object(&member);
    }
    committer.commit()?;

    println!(
        "Committed: {} addresses stored, {} batches, {} log rows",
        store.len("Address"),
        store.batches().len(),
        store.len(&ctx.config().transaction_log.table)
    );

    // cascade: deleting Jones removes the composed address in one batch
    jones.mark_for_delete()?;
    jones.save()?;
    println!(
        "Deleted Jones: {} people and {} addresses remain",
        store.len("Person"),
        store.len("Address")
    );

    tracing::info!(identity_map = ?ctx.identity_map(), "walkthrough complete");
    Ok(())
}
