//! Cloud Firestore over its REST API.
//!
//! Firestore wraps every value in a typed object (`{"stringValue": "x"}`).
//! Documents are converted from and to plain JSON at this boundary.

use async_trait::async_trait;
use reqwest::{Client, StatusCode};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Number, Value, json};

use super::check;
use crate::identity::AccessToken;
use crate::ports::{Document, DocumentStore, Result, ToTransport};

/// [`DocumentStore`] backed by Cloud Firestore.
pub struct Firestore {
    http: Client,
    documents_url: String,
}

#[derive(Debug, Default, Serialize, Deserialize)]
struct FirestoreDocument {
    #[serde(default)]
    fields: Map<String, Value>,
}

impl Firestore {
    pub fn new(
        http: Client,
        base_url: impl AsRef<str>,
        project_id: &str,
        database: &str,
    ) -> Self {
        Self {
            http,
            documents_url: format!(
                "{}/projects/{project_id}/databases/{database}/documents",
                base_url.as_ref()
            ),
        }
    }

    fn url(&self, collection: &str, key: &str) -> String {
        format!("{}/{collection}/{key}", self.documents_url)
    }
}

#[async_trait]
impl DocumentStore for Firestore {
    async fn get(
        &self,
        token: &AccessToken,
        collection: &str,
        key: &str,
    ) -> Result<Option<Document>> {
        let response = self
            .http
            .get(self.url(collection, key))
            .bearer_auth(token.as_str())
            .send()
            .await
            .catch()?;

        if response.status() == StatusCode::NOT_FOUND {
            return Ok(None);
        }

        let document: FirestoreDocument = check(response).await?.json().await.catch()?;
        Ok(Some(decode_fields(document.fields)))
    }

    async fn merge(
        &self,
        token: &AccessToken,
        collection: &str,
        key: &str,
        fields: Document,
    ) -> Result<()> {
        // Only masked fields are written, the others keep their value.
        let mask = fields
            .keys()
            .map(|field| ("updateMask.fieldPaths", field.clone()))
            .collect::<Vec<_>>();
        let body = FirestoreDocument {
            fields: encode_fields(fields),
        };

        let response = self
            .http
            .patch(self.url(collection, key))
            .bearer_auth(token.as_str())
            .query(&mask)
            .json(&body)
            .send()
            .await
            .catch()?;
        check(response).await?;

        Ok(())
    }
}

fn encode_fields(fields: Document) -> Map<String, Value> {
    fields
        .into_iter()
        .map(|(name, value)| (name, encode(value)))
        .collect()
}

fn encode(value: Value) -> Value {
    match value {
        Value::Null => json!({ "nullValue": null }),
        Value::Bool(b) => json!({ "booleanValue": b }),
        Value::Number(n) => match n.as_i64() {
            // 64-bit integers travel as strings.
            Some(i) => json!({ "integerValue": i.to_string() }),
            None => json!({ "doubleValue": n }),
        },
        Value::String(s) => json!({ "stringValue": s }),
        Value::Array(values) => json!({
            "arrayValue": { "values": values.into_iter().map(encode).collect::<Vec<_>>() }
        }),
        Value::Object(fields) => json!({
            "mapValue": { "fields": encode_fields(fields) }
        }),
    }
}

fn decode_fields(fields: Map<String, Value>) -> Document {
    fields
        .into_iter()
        .map(|(name, value)| (name, decode(value)))
        .collect()
}

fn decode(value: Value) -> Value {
    let Value::Object(typed) = value else {
        return Value::Null;
    };
    let Some((kind, inner)) = typed.into_iter().next() else {
        return Value::Null;
    };

    match (kind.as_str(), inner) {
        ("integerValue", Value::String(s)) => s
            .parse::<i64>()
            .map(|i| Value::Number(Number::from(i)))
            .unwrap_or(Value::String(s)),
        ("arrayValue", Value::Object(mut array)) => match array.remove("values") {
            Some(Value::Array(values)) => {
                Value::Array(values.into_iter().map(decode).collect())
            },
            _ => Value::Array(Vec::new()),
        },
        ("mapValue", Value::Object(mut map)) => match map.remove("fields") {
            Some(Value::Object(fields)) => Value::Object(decode_fields(fields)),
            _ => Value::Object(Map::new()),
        },
        ("nullValue", _) => Value::Null,
        // string, boolean, double, timestamp, reference, bytes.
        (_, inner) => inner,
    }
}
