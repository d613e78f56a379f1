//! Tenant directory listing

use reqwest::header;
use serde::Deserialize;

use crate::error::AuthError;

/// API version of the tenant-listing endpoint
const TENANTS_API_VERSION: &str = "2018-01-01";

/// An organizational directory the signed-in account can reach
#[derive(Debug, Clone, Deserialize)]
pub struct Tenant {
    #[serde(rename = "tenantId")]
    pub tenant_id: String,
    #[serde(default, rename = "displayName")]
    pub display_name: String,
    #[serde(default, rename = "countryCode")]
    pub country_code: String,
}

/// Collection envelope the directory endpoint answers with
#[derive(Debug, Deserialize)]
struct TenantList {
    #[serde(default)]
    value: Vec<Tenant>,
}

/// List the tenants accessible to the bearer of `bearer`
pub async fn list(
    http: &reqwest::Client,
    management_url: &str,
    bearer: &str,
) -> Result<Vec<Tenant>, AuthError> {
    const OPERATION: &str = "tenant listing";

    let url = format!(
        "{}/tenants?api-version={}",
        management_url.trim_end_matches('/'),
        TENANTS_API_VERSION
    );

    let response = http
        .get(&url)
        .header(header::AUTHORIZATION, bearer)
        .header(header::ACCEPT, "application/json")
        .send()
        .await
        .map_err(|source| AuthError::Http {
            operation: OPERATION,
            source,
        })?;

    if !response.status().is_success() {
        return Err(AuthError::UnexpectedStatus {
            operation: OPERATION,
            status: response.status(),
        });
    }

    let body = response.text().await.map_err(|source| AuthError::Http {
        operation: OPERATION,
        source,
    })?;
    let list: TenantList = serde_json::from_str(&body).map_err(|source| AuthError::Decode {
        operation: OPERATION,
        source,
    })?;

    Ok(list.value)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_tenant_list_envelope() {
        let body = r#"{
            "value": [
                {"id": "/tenants/x", "tenantId": "x", "displayName": "Contoso", "countryCode": "US"},
                {"tenantId": "y"}
            ]
        }"#;

        let list: TenantList = serde_json::from_str(body).unwrap();
        assert_eq!(list.value.len(), 2);
        assert_eq!(list.value[0].tenant_id, "x");
        assert_eq!(list.value[0].display_name, "Contoso");
        assert_eq!(list.value[1].display_name, "");
    }
}
