//! QuickSight API client
//!
//! The engine only depends on the request/response contract of two calls,
//! expressed as the [`QuickSightApi`] trait. The production implementation
//! shells out to the `aws` CLI so the tool inherits the caller's credential
//! chain and SigV4 signing; tests inject an in-memory fake instead.

use crate::error::{AppError, AppResult};
use serde_json::Value;
use std::process::Command;
use tracing::debug;

/// Response of the describe call
#[derive(Debug, Clone)]
pub struct DescribeDataSetOutput {
    pub status: u16,
    pub data_set: Value,
}

/// Response of the update call
#[derive(Debug, Clone)]
pub struct UpdateDataSetOutput {
    pub status: u16,
    pub raw: Value,
}

/// The two vendor calls the reconciler needs, plus account-id resolution
pub trait QuickSightApi {
    fn caller_account_id(&self) -> AppResult<String>;

    fn describe_data_set(
        &self,
        aws_account_id: &str,
        data_set_id: &str,
    ) -> AppResult<DescribeDataSetOutput>;

    fn update_data_set(&self, input: &Value) -> AppResult<UpdateDataSetOutput>;
}

/// `aws` CLI backed client
#[derive(Debug, Clone)]
pub struct AwsCliClient {
    bin: String,
}

impl Default for AwsCliClient {
    fn default() -> Self {
        Self {
            bin: "aws".to_string(),
        }
    }
}

impl AwsCliClient {
    fn run(&self, args: &[&str]) -> AppResult<Value> {
        debug!(bin = self.bin.as_str(), ?args, "invoking aws cli");
        let output = Command::new(&self.bin).args(args).output()?;
        if !output.status.success() {
            return Err(AppError::Client(
                String::from_utf8_lossy(&output.stderr).trim().to_string(),
            ));
        }
        Ok(serde_json::from_slice(&output.stdout)?)
    }
}

fn status_of(response: &Value) -> u16 {
    response
        .get("Status")
        .and_then(Value::as_u64)
        .unwrap_or(0) as u16
}

impl QuickSightApi for AwsCliClient {
    fn caller_account_id(&self) -> AppResult<String> {
        let identity = self.run(&["sts", "get-caller-identity", "--output", "json"])?;
        identity
            .get("Account")
            .and_then(Value::as_str)
            .map(str::to_string)
            .ok_or_else(|| {
                AppError::NoAccountId("sts get-caller-identity returned no Account".to_string())
            })
    }

    fn describe_data_set(
        &self,
        aws_account_id: &str,
        data_set_id: &str,
    ) -> AppResult<DescribeDataSetOutput> {
        let mut response = self.run(&[
            "quicksight",
            "describe-data-set",
            "--aws-account-id",
            aws_account_id,
            "--data-set-id",
            data_set_id,
            "--output",
            "json",
        ])?;
        let status = status_of(&response);
        let data_set = response
            .get_mut("DataSet")
            .map(Value::take)
            .unwrap_or(Value::Null);
        Ok(DescribeDataSetOutput { status, data_set })
    }

    fn update_data_set(&self, input: &Value) -> AppResult<UpdateDataSetOutput> {
        let payload = serde_json::to_string(input)?;
        let response = self.run(&[
            "quicksight",
            "update-data-set",
            "--cli-input-json",
            &payload,
            "--output",
            "json",
        ])?;
        Ok(UpdateDataSetOutput {
            status: status_of(&response),
            raw: response,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use serde_json::json;

    #[test]
    fn test_status_of_reads_vendor_status() {
        assert_eq!(status_of(&json!({"Status": 200})), 200);
        assert_eq!(status_of(&json!({})), 0);
    }
}
