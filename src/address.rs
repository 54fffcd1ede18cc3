use crate::config::RedisConfig;
use crate::error::{Error, Result};
use crate::store::JsonStore;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::{debug, info, warn};

/// A service address and the territory whose tariffs apply to it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Address {
    pub id: i64,
    pub address: String,
    pub territory_id: String,
    pub territory_name: String,
    pub conn_type: Option<Vec<String>>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AddressList {
    pub addresses: Vec<Address>,
}

impl Address {
    /// Build from a stored address document. Documents without a territory
    /// are not serviceable and yield `None`.
    pub fn from_document(doc: &Value) -> Result<Option<Self>> {
        let territory_id = match doc.get("territoryId") {
            None | Some(Value::Null) => return Ok(None),
            Some(Value::String(s)) => s.clone(),
            Some(Value::Number(n)) => n.to_string(),
            Some(other) => {
                return Err(Error::parse(format!("territoryId has unexpected type: {other}")));
            }
        };

        let id = match doc.get("id") {
            Some(Value::Number(n)) => n.as_i64(),
            Some(Value::String(s)) => s.parse().ok(),
            _ => None,
        }
        .ok_or_else(|| Error::parse("address document has no integer id"))?;

        let territory_name = doc
            .get("territory")
            .and_then(Value::as_str)
            .ok_or_else(|| Error::parse(format!("address {id} has no territory name")))?
            .to_string();

        let non_empty = |field: &str| {
            doc.get(field)
                .and_then(Value::as_str)
                .filter(|s| !s.is_empty())
                .map(str::to_string)
        };
        let address = non_empty("addressShort")
            .or_else(|| non_empty("title"))
            .unwrap_or_default();

        let conn_type = match doc.get("conn_type") {
            None | Some(Value::Null) => None,
            Some(v) => Some(
                serde_json::from_value(v.clone())
                    .map_err(|e| Error::parse(format!("conn_type of address {id}: {e}")))?,
            ),
        };

        Ok(Some(Self {
            id,
            address,
            territory_id,
            territory_name,
            conn_type,
        }))
    }
}

fn parse_json(raw: &str, what: &str) -> Result<Value> {
    serde_json::from_str(raw).map_err(|e| Error::parse(format!("{what}: {e}")))
}

pub async fn search_addresses(
    store: &dyn JsonStore,
    config: &RedisConfig,
    query: &str,
) -> Result<AddressList> {
    info!(query, "searching addresses");
    let docs = store
        .search(&config.address_index, &query.to_lowercase(), 0, config.search_limit)
        .await?;

    if docs.is_empty() {
        warn!(query, "no addresses found");
        return Err(Error::not_found("No addresses found"));
    }

    let mut addresses = Vec::with_capacity(docs.len());
    for doc in &docs {
        let value = parse_json(&doc.json, &doc.key)?;
        if let Some(address) = Address::from_document(&value)? {
            addresses.push(address);
        }
    }

    info!(query, found = addresses.len(), "address search done");
    Ok(AddressList { addresses })
}

pub async fn address_by_id(
    store: &dyn JsonStore,
    config: &RedisConfig,
    address_id: &str,
) -> Result<Address> {
    let key = format!("{}{address_id}", config.address_prefix);
    let Some(raw) = store.json_get(&key).await? else {
        warn!(address_id, "address not found");
        return Err(Error::not_found("Address not found"));
    };

    let value = parse_json(&raw, &key)?;
    let address = Address::from_document(&value)?
        .ok_or_else(|| Error::parse(format!("address {address_id} has no territory")))?;
    debug!(address_id, "address fetched");
    Ok(address)
}

/// Tariff sheet of a territory, returned exactly as stored.
pub async fn tariffs(store: &dyn JsonStore, config: &RedisConfig, territory_id: &str) -> Result<Value> {
    let key = format!("{}{territory_id}", config.tariff_prefix);
    let Some(raw) = store.json_get(&key).await? else {
        warn!(territory_id, "no tariffs for territory");
        return Err(Error::not_found("No tariffs found"));
    };
    info!(territory_id, "tariffs fetched");
    parse_json(&raw, &key)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::memory::MemoryJsonStore;
    use serde_json::json;

    #[test]
    fn short_address_preferred_over_title() {
        let doc = json!({
            "id": 12,
            "addressShort": "Lenina 1",
            "title": "Russia, Moscow, Lenina 1",
            "territoryId": "T-7",
            "territory": "Moscow",
            "conn_type": ["ftth", "adsl"]
        });
        let address = Address::from_document(&doc).unwrap().unwrap();
        assert_eq!(address.address, "Lenina 1");
        assert_eq!(address.territory_id, "T-7");
        assert_eq!(
            address.conn_type,
            Some(vec!["ftth".to_string(), "adsl".to_string()])
        );
    }

    #[test]
    fn empty_short_address_falls_back_to_title() {
        let doc = json!({
            "id": 1, "addressShort": "", "title": "Full title",
            "territoryId": 5, "territory": "North"
        });
        let address = Address::from_document(&doc).unwrap().unwrap();
        assert_eq!(address.address, "Full title");
        assert_eq!(address.territory_id, "5");
        assert!(address.conn_type.is_none());
    }

    #[test]
    fn missing_territory_is_skipped() {
        let doc = json!({"id": 1, "title": "x", "territoryId": null, "territory": "y"});
        assert!(Address::from_document(&doc).unwrap().is_none());
    }

    #[test]
    fn missing_id_is_an_error() {
        let doc = json!({"title": "x", "territoryId": "1", "territory": "y"});
        assert!(Address::from_document(&doc).is_err());
    }

    fn store() -> MemoryJsonStore {
        let store = MemoryJsonStore::new().with_index("idx:adds", "adds:");
        store.insert(
            "adds:1",
            &json!({"id": 1, "addressShort": "Mira 5", "territoryId": "10", "territory": "East"}),
        );
        store.insert(
            "adds:2",
            &json!({"id": 2, "title": "Mira 7", "territoryId": null, "territory": "East"}),
        );
        store.insert("terrtar:10", &json!({"internet": [{"name": "Basic", "price": 500}]}));
        store
    }

    #[tokio::test]
    async fn search_lowercases_query_and_skips_unserviceable() {
        let list = search_addresses(&store(), &RedisConfig::default(), "MIRA")
            .await
            .unwrap();
        assert_eq!(list.addresses.len(), 1);
        assert_eq!(list.addresses[0].id, 1);
    }

    #[tokio::test]
    async fn search_without_hits_is_not_found() {
        let err = search_addresses(&store(), &RedisConfig::default(), "nowhere")
            .await
            .unwrap_err();
        assert!(matches!(err, Error::NotFound(_)));
    }

    #[tokio::test]
    async fn lookup_by_id() {
        let config = RedisConfig::default();
        let address = address_by_id(&store(), &config, "1").await.unwrap();
        assert_eq!(address.address, "Mira 5");
        assert!(matches!(
            address_by_id(&store(), &config, "99").await,
            Err(Error::NotFound(_))
        ));
    }

    #[tokio::test]
    async fn tariffs_are_returned_verbatim() {
        let config = RedisConfig::default();
        let value = tariffs(&store(), &config, "10").await.unwrap();
        assert_eq!(value["internet"][0]["price"], 500);
        assert!(matches!(
            tariffs(&store(), &config, "11").await,
            Err(Error::NotFound(_))
        ));
    }
}
