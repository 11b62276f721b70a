//! REST ledger-gateway network.
//!
//! Talks to a ledger gateway exposing consensus and token services over
//! JSON. The gateway signs transactions with the operator key supplied at
//! construction, so no cryptography happens in-process.

use async_trait::async_trait;
use reqwest::{header, Client, StatusCode};
use serde::{Deserialize, Serialize};
use std::time::Duration;

use super::traits::{LedgerError, LedgerNetwork, TransactionReceipt};

/// REST gateway implementation of `LedgerNetwork`.
pub struct RestLedgerNetwork {
    client: Client,
    base_url: String,
    operator_account: String,
}

impl RestLedgerNetwork {
    /// Create a new gateway network.
    pub fn new(
        base_url: impl Into<String>,
        operator_account: impl Into<String>,
        operator_key: impl Into<String>,
        request_timeout: Duration,
    ) -> Result<Self, LedgerError> {
        let mut headers = header::HeaderMap::new();
        headers.insert(
            header::CONTENT_TYPE,
            header::HeaderValue::from_static("application/json"),
        );
        let auth = header::HeaderValue::from_str(&format!("Bearer {}", operator_key.into()))
            .map_err(|e| LedgerError::Config(format!("invalid operator key: {}", e)))?;
        headers.insert(header::AUTHORIZATION, auth);

        let client = Client::builder()
            .default_headers(headers)
            .timeout(request_timeout)
            .build()
            .map_err(|e| LedgerError::Config(e.to_string()))?;

        Ok(Self {
            client,
            base_url: base_url.into(),
            operator_account: operator_account.into(),
        })
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }

    /// Map transport-level failures into the typed taxonomy.
    fn map_transport(error: reqwest::Error) -> LedgerError {
        if error.is_timeout() {
            LedgerError::Timeout(error.to_string())
        } else if error.is_connect() {
            LedgerError::Unavailable(error.to_string())
        } else {
            LedgerError::Unavailable(error.to_string())
        }
    }

    /// Map a non-success HTTP response into the typed taxonomy.
    async fn map_failure(response: reqwest::Response) -> LedgerError {
        let http_status = response.status();
        let body: ErrorBody = response.json().await.unwrap_or_default();
        let status = body.status.unwrap_or_else(|| http_status.to_string());

        match http_status {
            StatusCode::PAYMENT_REQUIRED => LedgerError::InsufficientBalance(status),
            StatusCode::BAD_REQUEST | StatusCode::UNPROCESSABLE_ENTITY => {
                LedgerError::InvalidParameter(body.message.unwrap_or(status))
            }
            StatusCode::TOO_MANY_REQUESTS | StatusCode::SERVICE_UNAVAILABLE => {
                LedgerError::Unavailable(status)
            }
            StatusCode::GATEWAY_TIMEOUT => LedgerError::Timeout(status),
            s if s.is_server_error() => LedgerError::Unavailable(status),
            _ => LedgerError::Precheck { status },
        }
    }

    async fn post_receipt(
        &self,
        path: &str,
        body: &impl Serialize,
    ) -> Result<TransactionReceipt, LedgerError> {
        let response = self
            .client
            .post(self.url(path))
            .json(body)
            .send()
            .await
            .map_err(Self::map_transport)?;

        if !response.status().is_success() {
            return Err(Self::map_failure(response).await);
        }

        let receipt: ReceiptBody = response
            .json()
            .await
            .map_err(|e| LedgerError::InvalidResponse(e.to_string()))?;
        receipt.into_receipt()
    }
}

#[derive(Debug, Default, Deserialize)]
struct ErrorBody {
    status: Option<String>,
    message: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ReceiptBody {
    transaction_id: String,
    status: String,
    #[serde(default)]
    topic_sequence_number: Option<u64>,
    #[serde(default)]
    serial_numbers: Vec<u64>,
}

impl ReceiptBody {
    /// A 2xx response can still carry a failed consensus status.
    fn into_receipt(self) -> Result<TransactionReceipt, LedgerError> {
        if self.status != "SUCCESS" {
            return Err(LedgerError::ReceiptStatus { status: self.status });
        }
        Ok(TransactionReceipt {
            transaction_id: self.transaction_id,
            status: self.status,
            topic_sequence_number: self.topic_sequence_number,
            serial_numbers: self.serial_numbers,
        })
    }
}

#[derive(Debug, Deserialize)]
struct BalanceBody {
    balance: u64,
}

#[derive(Debug, Deserialize)]
struct TopicBody {
    topic_id: String,
}

#[derive(Debug, Deserialize)]
struct TokenBody {
    token_id: String,
}

#[derive(Debug, Serialize)]
struct MessageRequest<'a> {
    message: &'a str,
}

#[derive(Debug, Serialize)]
struct TopicRequest<'a> {
    memo: &'a str,
}

#[derive(Debug, Serialize)]
struct TokenRequest<'a> {
    name: &'a str,
    symbol: &'a str,
    token_type: &'a str,
}

#[derive(Debug, Serialize)]
struct MintRequest<'a> {
    metadata: &'a str,
}

#[derive(Debug, Serialize)]
struct TransferRequest<'a> {
    serial: u64,
    from_account: &'a str,
    to_account: &'a str,
}

#[derive(Debug, Serialize)]
struct AccountRequest<'a> {
    account: &'a str,
}

#[derive(Debug, Serialize)]
struct ContractRequest<'a> {
    function: &'a str,
    params: serde_json::Value,
    #[serde(skip_serializing_if = "Option::is_none")]
    gas: Option<u64>,
}

#[async_trait]
impl LedgerNetwork for RestLedgerNetwork {
    fn id(&self) -> &str {
        &self.base_url
    }

    async fn operator_balance(&self) -> Result<u64, LedgerError> {
        let path = format!("/v1/accounts/{}/balance", self.operator_account);
        let response = self
            .client
            .get(self.url(&path))
            .send()
            .await
            .map_err(Self::map_transport)?;

        if !response.status().is_success() {
            return Err(Self::map_failure(response).await);
        }

        let body: BalanceBody = response
            .json()
            .await
            .map_err(|e| LedgerError::InvalidResponse(e.to_string()))?;
        Ok(body.balance)
    }

    async fn submit_message(
        &self,
        topic_id: &str,
        message: &str,
    ) -> Result<TransactionReceipt, LedgerError> {
        let path = format!("/v1/topics/{}/messages", topic_id);
        self.post_receipt(&path, &MessageRequest { message }).await
    }

    async fn create_topic(&self, memo: &str) -> Result<String, LedgerError> {
        let response = self
            .client
            .post(self.url("/v1/topics"))
            .json(&TopicRequest { memo })
            .send()
            .await
            .map_err(Self::map_transport)?;

        if !response.status().is_success() {
            return Err(Self::map_failure(response).await);
        }

        let body: TopicBody = response
            .json()
            .await
            .map_err(|e| LedgerError::InvalidResponse(e.to_string()))?;
        Ok(body.topic_id)
    }

    async fn create_nft_collection(
        &self,
        name: &str,
        symbol: &str,
    ) -> Result<String, LedgerError> {
        let response = self
            .client
            .post(self.url("/v1/tokens"))
            .json(&TokenRequest {
                name,
                symbol,
                token_type: "non_fungible_unique",
            })
            .send()
            .await
            .map_err(Self::map_transport)?;

        if !response.status().is_success() {
            return Err(Self::map_failure(response).await);
        }

        let body: TokenBody = response
            .json()
            .await
            .map_err(|e| LedgerError::InvalidResponse(e.to_string()))?;
        Ok(body.token_id)
    }

    async fn mint_nft(
        &self,
        token_id: &str,
        metadata: &[u8],
    ) -> Result<TransactionReceipt, LedgerError> {
        let metadata = String::from_utf8_lossy(metadata);
        let path = format!("/v1/tokens/{}/mint", token_id);
        self.post_receipt(&path, &MintRequest { metadata: &metadata }).await
    }

    async fn transfer_nft(
        &self,
        token_id: &str,
        serial: u64,
        from_account: &str,
        to_account: &str,
    ) -> Result<TransactionReceipt, LedgerError> {
        let path = format!("/v1/tokens/{}/transfer", token_id);
        self.post_receipt(
            &path,
            &TransferRequest {
                serial,
                from_account,
                to_account,
            },
        )
        .await
    }

    async fn associate_token(&self, token_id: &str, account: &str) -> Result<(), LedgerError> {
        let path = format!("/v1/tokens/{}/associate", token_id);
        let response = self
            .client
            .post(self.url(&path))
            .json(&AccountRequest { account })
            .send()
            .await
            .map_err(Self::map_transport)?;

        if response.status().is_success() {
            return Ok(());
        }

        // Re-associating is not an error for our purposes.
        let error = Self::map_failure(response).await;
        match &error {
            LedgerError::Precheck { status } if status == "TOKEN_ALREADY_ASSOCIATED_TO_ACCOUNT" => {
                Ok(())
            }
            _ => Err(error),
        }
    }

    async fn freeze_account(
        &self,
        token_id: &str,
        account: &str,
    ) -> Result<TransactionReceipt, LedgerError> {
        let path = format!("/v1/tokens/{}/freeze", token_id);
        self.post_receipt(&path, &AccountRequest { account }).await
    }

    async fn unfreeze_account(
        &self,
        token_id: &str,
        account: &str,
    ) -> Result<TransactionReceipt, LedgerError> {
        let path = format!("/v1/tokens/{}/unfreeze", token_id);
        self.post_receipt(&path, &AccountRequest { account }).await
    }

    async fn nft_balance(&self, token_id: &str, account: &str) -> Result<u64, LedgerError> {
        let path = format!("/v1/tokens/{}/balances/{}", token_id, account);
        let response = self
            .client
            .get(self.url(&path))
            .send()
            .await
            .map_err(Self::map_transport)?;

        if !response.status().is_success() {
            return Err(Self::map_failure(response).await);
        }

        let body: BalanceBody = response
            .json()
            .await
            .map_err(|e| LedgerError::InvalidResponse(e.to_string()))?;
        Ok(body.balance)
    }

    async fn call_contract(
        &self,
        contract_id: &str,
        function: &str,
        params: serde_json::Value,
    ) -> Result<TransactionReceipt, LedgerError> {
        let path = format!("/v1/contracts/{}/call", contract_id);
        self.post_receipt(
            &path,
            &ContractRequest {
                function,
                params,
                gas: None,
            },
        )
        .await
    }

    async fn transaction_exists(&self, transaction_id: &str) -> Result<bool, LedgerError> {
        let path = format!("/v1/transactions/{}", transaction_id);
        let response = self
            .client
            .get(self.url(&path))
            .send()
            .await
            .map_err(Self::map_transport)?;

        match response.status() {
            StatusCode::NOT_FOUND => Ok(false),
            s if s.is_success() => Ok(true),
            _ => Err(Self::map_failure(response).await),
        }
    }
}
