//! Beneficial-ownership record importer.
//!
//! Turns one NDJSON ownership record into a company (child), its owner
//! (parent) and the ownership relationship between them, with provenance
//! back to the raw line. It is the [`RecordProcessor`] the ingest binary runs
//! inside the worker pool.

use std::sync::Arc;

use serde::Deserialize;
use serde_json::Value;
use tracing::debug;

use crate::entity::{Entity, EntityType, NewEntity};
use crate::error::{GraphResult, ValidationError};
use crate::identifier::Identifier;
use crate::pipeline::RecordProcessor;
use crate::provenance::{ProvenanceSubject, RawRecord, RawRecordId};
use crate::relationship::{Interest, Relationship, RelationshipId};
use crate::resolver::{resolve_checked, IdentityResolver, NoopResolver};
use crate::staging::ImportMetadata;
use crate::statement::Statement;
use crate::upsert::UpsertEngine;

/// Source-level settings shared by every record of one import.
#[derive(Debug, Clone)]
pub struct ImportContext {
    /// Dataset id used in source identifiers and relationship keys.
    pub document_id: String,
    pub metadata: ImportMetadata,
    /// Jurisdiction stamped on companies whose record carries none.
    pub jurisdiction_code: Option<String>,
    /// Language of the source's free text.
    pub lang_code: Option<String>,
}

impl ImportContext {
    #[must_use]
    pub fn new(document_id: impl Into<String>, metadata: ImportMetadata) -> Self {
        Self {
            document_id: document_id.into(),
            metadata,
            jurisdiction_code: None,
            lang_code: None,
        }
    }

    #[must_use]
    pub fn with_jurisdiction_code(mut self, code: impl Into<String>) -> Self {
        self.jurisdiction_code = Some(code.into());
        self
    }

    #[must_use]
    pub fn with_lang_code(mut self, code: impl Into<String>) -> Self {
        self.lang_code = Some(code.into());
        self
    }
}

#[derive(Debug, Deserialize)]
struct OwnershipRecord {
    #[serde(default)]
    company_number: Option<Value>,
    #[serde(default)]
    company_name: Option<String>,
    #[serde(default)]
    company_address: Option<String>,
    #[serde(default)]
    jurisdiction_code: Option<String>,
    #[serde(default)]
    owner_name: Option<String>,
    #[serde(default)]
    owner_type: Option<EntityType>,
    #[serde(default)]
    owner_country: Option<String>,
    #[serde(default)]
    owner_address: Option<String>,
    #[serde(default)]
    owner_nationality: Option<String>,
    #[serde(default)]
    is_beneficial_owner: Option<bool>,
    #[serde(default)]
    interests: Vec<Interest>,
    #[serde(default)]
    statement: Option<Value>,
}

fn non_blank(value: Option<&str>) -> Option<&str> {
    value.map(str::trim).filter(|v| !v.is_empty())
}

fn company_number(record: &OwnershipRecord) -> Result<String, ValidationError> {
    let number = match &record.company_number {
        None | Some(Value::Null) => return Err(ValidationError::missing("company_number")),
        Some(Value::String(s)) => s.trim().to_string(),
        Some(Value::Number(n)) => n.to_string(),
        Some(_) => {
            return Err(ValidationError::MalformedRecord {
                reason: "company_number must be a string or a number".to_string(),
            })
        }
    };
    if number.is_empty() {
        return Err(ValidationError::BlankField {
            field: "company_number".to_string(),
        });
    }
    Ok(number)
}

struct StatementFields {
    statement_type: String,
    date: Option<String>,
    details: Value,
}

fn statement_fields(raw: &Value) -> Result<StatementFields, ValidationError> {
    match raw {
        Value::String(kind) if !kind.trim().is_empty() => Ok(StatementFields {
            statement_type: kind.trim().to_string(),
            date: None,
            details: Value::Null,
        }),
        Value::Object(map) => {
            let statement_type = map
                .get("type")
                .and_then(Value::as_str)
                .and_then(|t| non_blank(Some(t)))
                .ok_or_else(|| ValidationError::missing("statement.type"))?
                .to_string();
            let date = map.get("date").and_then(Value::as_str).map(str::to_string);
            Ok(StatementFields {
                statement_type,
                date,
                details: raw.clone(),
            })
        }
        _ => Err(ValidationError::MalformedRecord {
            reason: "statement must be a string or an object".to_string(),
        }),
    }
}

/// Imports ownership records through an [`UpsertEngine`].
#[derive(Clone)]
pub struct BeneficialOwnerImporter {
    engine: UpsertEngine,
    resolver: Arc<dyn IdentityResolver>,
    context: ImportContext,
}

impl std::fmt::Debug for BeneficialOwnerImporter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BeneficialOwnerImporter")
            .field("context", &self.context)
            .finish_non_exhaustive()
    }
}

impl BeneficialOwnerImporter {
    #[must_use]
    pub fn new(engine: UpsertEngine, context: ImportContext) -> Self {
        Self {
            engine,
            resolver: Arc::new(NoopResolver),
            context,
        }
    }

    /// Resolver run on the company side before it is persisted.
    #[must_use]
    pub fn with_resolver(mut self, resolver: Arc<dyn IdentityResolver>) -> Self {
        self.resolver = resolver;
        self
    }

    #[must_use]
    pub const fn context(&self) -> &ImportContext {
        &self.context
    }

    fn record_provenance(&self, subject: ProvenanceSubject, raw_id: &RawRecordId) -> GraphResult<()> {
        self.engine
            .stores()
            .provenance
            .upsert(subject, &self.context.metadata.import_id, std::slice::from_ref(raw_id))?;
        Ok(())
    }

    fn attach_statement(&self, child: &Entity, raw: &Value) -> GraphResult<()> {
        let fields = statement_fields(raw)?;
        let statements = &self.engine.stores().statements;
        let exists = statements
            .find_by_entity(child.id)?
            .iter()
            .any(|s| s.statement_type == fields.statement_type && s.date == fields.date);
        if exists {
            return Ok(());
        }
        let mut statement = Statement::new(child.id, fields.statement_type).with_details(fields.details);
        statement.date = fields.date;
        statements.insert(statement)?;
        Ok(())
    }

    fn import(&self, line: &str) -> GraphResult<()> {
        let record: OwnershipRecord = serde_json::from_str(line).map_err(|e| ValidationError::MalformedRecord {
            reason: e.to_string(),
        })?;
        let number = company_number(&record)?;

        let owner_name = if record.is_beneficial_owner == Some(true) {
            let name = non_blank(record.owner_name.as_deref());
            if name.is_none() && record.statement.is_none() {
                return Err(ValidationError::BlankField {
                    field: "owner_name".to_string(),
                }
                .into());
            }
            name
        } else {
            None
        };
        if owner_name.is_none() && record.statement.is_none() {
            debug!(company_number = %number, "not a beneficial owner record, skipping");
            return Ok(());
        }

        let raw = RawRecord::new(line, None, self.context.metadata.import_id.clone());
        let raw_id = raw.id.clone();
        self.engine.stores().raw_records.bulk_upsert(vec![raw])?;

        let document_id = self.context.document_id.as_str();
        let child_identifier = Identifier::source_company(document_id, number.as_str());
        let mut child = NewEntity::legal_entity().identifier(child_identifier.clone());
        child.attributes.name = record.company_name.clone();
        child.attributes.address = record.company_address.clone();
        child.attributes.jurisdiction_code = non_blank(record.jurisdiction_code.as_deref())
            .map(str::to_string)
            .or_else(|| self.context.jurisdiction_code.clone());
        child.attributes.lang_code = self.context.lang_code.clone();
        child.attributes.company_number = Some(number.clone());

        let child = resolve_checked(self.resolver.as_ref(), child)?;
        let child = self.engine.upsert_and_merge_duplicates(&child)?;
        self.record_provenance(ProvenanceSubject::Entity(child.id), &raw_id)?;

        if let Some(statement) = &record.statement {
            self.attach_statement(&child, statement)?;
        }

        let Some(owner_name) = owner_name else {
            return Ok(());
        };

        let parent_identifier = Identifier::source_beneficial_owner(document_id, number.as_str(), owner_name);
        let mut parent = NewEntity::new(record.owner_type.unwrap_or(EntityType::NaturalPerson))
            .identifier(parent_identifier.clone())
            .name(owner_name);
        parent.attributes.address = record.owner_address.clone();
        parent.attributes.country_of_residence = record.owner_country.clone();
        parent.attributes.nationality = record.owner_nationality.clone();

        let parent = self.engine.upsert_and_merge_duplicates(&parent)?;
        self.record_provenance(ProvenanceSubject::Entity(parent.id), &raw_id)?;

        let relationship = Relationship::new(
            RelationshipId::derive(document_id, &child_identifier, &parent_identifier),
            parent.id,
            child.id,
        )
        .with_interests(record.interests)
        .with_provenance(self.context.metadata.provenance());

        let relationship = self.engine.upsert_relationship(&relationship)?;
        self.record_provenance(ProvenanceSubject::Relationship(relationship.id), &raw_id)?;
        Ok(())
    }
}

impl RecordProcessor for BeneficialOwnerImporter {
    fn process(&self, line: &str) -> GraphResult<()> {
        self.import(line)
    }
}
