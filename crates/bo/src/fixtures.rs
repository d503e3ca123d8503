//! Shared test model: people with addresses, invoices and notes

use crate::business_object::BusinessObject;
use crate::context::BoContext;
use crate::data_store::{InMemoryDataStore, Row};
use std::sync::Arc;
use stowage_core::{DataType, DeleteParentAction, PropValue, StowageConfig};
use stowage_schema::{
    ClassDef, ClassRegistry, LookupList, OrderCriteria, PropDef, RelationshipDef,
};
use uuid::Uuid;

pub(crate) fn registry() -> ClassRegistry {
    let party = ClassDef::new("Party")
        .abstract_class()
        .with_prop(PropDef::new("Name", DataType::String));

    let person = ClassDef::new("Person")
        .with_prop(PropDef::new("ID", DataType::Integer).compulsory())
        .with_prop(PropDef::new("Surname", DataType::String).compulsory())
        .with_prop(PropDef::new("FirstName", DataType::String))
        .with_prop(
            PropDef::new("Title", DataType::String).with_lookup(
                LookupList::new()
                    .with_item("Doctor", "Dr")
                    .with_item("Mister", "Mr"),
            ),
        )
        .with_prop(PropDef::new("Active", DataType::Bool))
        .with_prop(PropDef::new("Version", DataType::Integer))
        .with_key(["ID"])
        .with_relationship(
            RelationshipDef::multiple("Addresses", "Address")
                .with_prop("ID", "PersonID")
                .composition()
                .on_delete(DeleteParentAction::DeleteRelated)
                .order_by(OrderCriteria::new().asc("Street")),
        )
        .with_relationship(
            RelationshipDef::multiple("Invoices", "Invoice")
                .with_prop("ID", "PersonID")
                .on_delete(DeleteParentAction::Prevent),
        )
        .with_relationship(
            RelationshipDef::multiple("Notes", "Note")
                .with_prop("ID", "PersonID")
                .aggregation()
                .on_delete(DeleteParentAction::DereferenceRelated),
        );

    let address = ClassDef::new("Address")
        .with_object_id("AddressID")
        .with_prop(PropDef::new("PersonID", DataType::Integer))
        .with_prop(PropDef::new("Street", DataType::String))
        .with_relationship(
            RelationshipDef::single("Owner", "Person")
                .with_prop("PersonID", "ID")
                .composition(),
        );

    let home_address = ClassDef::new("HomeAddress").extends("Address");

    let invoice = ClassDef::new("Invoice")
        .with_object_id("InvoiceID")
        .with_prop(PropDef::new("PersonID", DataType::Integer))
        .with_prop(PropDef::new("Amount", DataType::Float))
        .with_relationship(
            RelationshipDef::single("Customer", "Person")
                .with_prop("PersonID", "ID")
                .keep_reference(false),
        );

    let note = ClassDef::new("Note")
        .with_object_id("NoteID")
        .with_prop(PropDef::new("PersonID", DataType::Integer))
        .with_prop(PropDef::new("Text", DataType::String))
        .with_prop(PropDef::new("AuthorID", DataType::Guid));

    ClassRegistry::from_classes([party, person, address, home_address, invoice, note])
        .expect("test model is valid")
}

pub(crate) fn context() -> (BoContext, Arc<InMemoryDataStore>) {
    context_with_config(StowageConfig::default())
}

pub(crate) fn context_with_config(config: StowageConfig) -> (BoContext, Arc<InMemoryDataStore>) {
    let store = Arc::new(InMemoryDataStore::new());
    let ctx = BoContext::with_config(registry(), store.clone(), config);
    (ctx, store)
}

fn seed(ctx: &BoContext, store: &InMemoryDataStore, class: &str, values: Vec<(&str, PropValue)>) {
    let row: Row = values
        .into_iter()
        .map(|(name, value)| (name.to_string(), value))
        .collect();
    store.seed(&ctx.class(class).unwrap(), row);
}

pub(crate) fn seed_person(ctx: &BoContext, store: &InMemoryDataStore, id: i64, surname: &str) {
    seed(
        ctx,
        store,
        "Person",
        vec![
            ("ID", PropValue::Int(id)),
            ("Surname", PropValue::from(surname)),
            ("Active", PropValue::Bool(true)),
        ],
    );
}

pub(crate) fn seed_person_with_version(
    ctx: &BoContext,
    store: &InMemoryDataStore,
    id: i64,
    surname: &str,
    version: i64,
) {
    seed(
        ctx,
        store,
        "Person",
        vec![
            ("ID", PropValue::Int(id)),
            ("Surname", PropValue::from(surname)),
            ("Active", PropValue::Bool(true)),
            ("Version", PropValue::Int(version)),
        ],
    );
}

pub(crate) fn seed_address(ctx: &BoContext, store: &InMemoryDataStore, person_id: i64, street: &str) -> Uuid {
    let id = Uuid::new_v4();
    seed(
        ctx,
        store,
        "Address",
        vec![
            ("AddressID", PropValue::Guid(id)),
            ("PersonID", PropValue::Int(person_id)),
            ("Street", PropValue::from(street)),
        ],
    );
    id
}

pub(crate) fn seed_invoice(ctx: &BoContext, store: &InMemoryDataStore, person_id: i64, amount: f64) -> Uuid {
    let id = Uuid::new_v4();
    seed(
        ctx,
        store,
        "Invoice",
        vec![
            ("InvoiceID", PropValue::Guid(id)),
            ("PersonID", PropValue::Int(person_id)),
            ("Amount", PropValue::Float(amount)),
        ],
    );
    id
}

pub(crate) fn seed_note(ctx: &BoContext, store: &InMemoryDataStore, person_id: i64, text: &str) -> Uuid {
    let id = Uuid::new_v4();
    seed(
        ctx,
        store,
        "Note",
        vec![
            ("NoteID", PropValue::Guid(id)),
            ("PersonID", PropValue::Int(person_id)),
            ("Text", PropValue::from(text)),
        ],
    );
    id
}

pub(crate) fn load_person(ctx: &BoContext, _store: &InMemoryDataStore, id: i64) -> BusinessObject {
    ctx.loader()
        .get_business_object_by_key("Person", &[("ID", PropValue::Int(id))])
        .unwrap()
        .expect("person is seeded")
}
