use async_trait::async_trait;
use log::debug;
use serde::de::DeserializeOwned;
use serde::Deserialize;

use super::core::JenkinsClient;
use crate::error::{Result, SentinelError};
use crate::providers::jenkins::BuildDetail;
use crate::providers::BuildSource;

#[derive(Debug, Deserialize)]
struct JobResponse {
    #[serde(default, rename = "allBuilds")]
    all_builds: Vec<BuildRef>,
}

#[derive(Debug, Deserialize)]
struct BuildRef {
    number: u32,
}

impl JenkinsClient {
    async fn get_json<T: DeserializeOwned>(&self, url: url::Url, what: &str) -> Result<T> {
        let body = self.get_with_backoff(&url).await?.text().await?;
        debug!("Jenkins response for {what}: {body}");

        serde_json::from_str(&body).map_err(|source| SentinelError::Decode {
            what: what.to_string(),
            source,
        })
    }

    /// Lists every build number Jenkins knows for the job, in server order.
    pub async fn list_build_numbers(&self, job_path: &str) -> Result<Vec<u32>> {
        let url = self.job_url(job_path, "api/json?tree=allBuilds[number]")?;
        let response: JobResponse = self
            .get_json(url, &format!("build list of {job_path}"))
            .await?;

        Ok(response.all_builds.into_iter().map(|b| b.number).collect())
    }

    /// Fetches the detail payload of one build.
    ///
    /// Any JSON object decodes; fields with unexpected shapes come back unset.
    pub async fn get_build_detail(&self, job_path: &str, build_number: u32) -> Result<BuildDetail> {
        let url = self.job_url(job_path, &format!("{build_number}/api/json"))?;
        self.get_json(url, &format!("build detail of {job_path}#{build_number}"))
            .await
    }

    pub async fn get_console_log(&self, job_path: &str, build_number: u32) -> Result<String> {
        let url = self.job_url(job_path, &format!("{build_number}/consoleText"))?;
        Ok(self.get_with_backoff(&url).await?.text().await?)
    }
}

#[async_trait]
impl BuildSource for JenkinsClient {
    async fn list_build_numbers(&self, job_path: &str) -> Result<Vec<u32>> {
        JenkinsClient::list_build_numbers(self, job_path).await
    }

    async fn get_build_detail(&self, job_path: &str, build_number: u32) -> Result<BuildDetail> {
        JenkinsClient::get_build_detail(self, job_path, build_number).await
    }

    async fn get_console_log(&self, job_path: &str, build_number: u32) -> Result<String> {
        JenkinsClient::get_console_log(self, job_path, build_number).await
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use mockito::Matcher;

    use super::*;
    use crate::auth::Credentials;
    use crate::providers::RetryPolicy;

    fn client_for(server: &mockito::Server) -> JenkinsClient {
        let credentials = Credentials::resolve("ci", None, Some("pw")).unwrap();
        let retry = RetryPolicy {
            max_attempts: 2,
            initial_backoff: Duration::from_millis(1),
            max_backoff: Duration::from_millis(1),
        };
        JenkinsClient::new(&server.url(), credentials, retry, Duration::from_secs(5)).unwrap()
    }

    #[tokio::test]
    async fn test_list_build_numbers_keeps_server_order() {
        let mut server = mockito::Server::new_async().await;
        let mock = server
            .mock("GET", "/job/api/api/json")
            .match_query(Matcher::Any)
            .with_status(200)
            .with_body(
                r#"{"_class":"WorkflowJob","allBuilds":[
                    {"_class":"WorkflowRun","number":12},
                    {"_class":"WorkflowRun","number":11},
                    {"_class":"WorkflowRun","number":9}]}"#,
            )
            .create_async()
            .await;

        let numbers = client_for(&server).list_build_numbers("job/api/").await.unwrap();
        assert_eq!(numbers, vec![12, 11, 9]);
        mock.assert_async().await;
    }

    #[tokio::test]
    async fn test_list_build_numbers_empty_job() {
        let mut server = mockito::Server::new_async().await;
        server
            .mock("GET", "/job/api/api/json")
            .match_query(Matcher::Any)
            .with_status(200)
            .with_body(r#"{"_class":"WorkflowJob"}"#)
            .create_async()
            .await;

        let numbers = client_for(&server).list_build_numbers("job/api").await.unwrap();
        assert!(numbers.is_empty());
    }

    #[tokio::test]
    async fn test_build_detail_decodes_core_fields() {
        let mut server = mockito::Server::new_async().await;
        server
            .mock("GET", "/job/api/42/api/json")
            .with_status(200)
            .with_body(
                r#"{"building":false,"result":"SUCCESS","timestamp":1714564800000,
                    "duration":61000,"actions":[{},{"_class":"hudson.model.CauseAction",
                    "causes":[{"userName":"Ada"}]}]}"#,
            )
            .create_async()
            .await;

        let detail = client_for(&server).get_build_detail("job/api", 42).await.unwrap();
        assert_eq!(detail.building, Some(false));
        assert_eq!(detail.result.as_deref(), Some("SUCCESS"));
        assert_eq!(detail.timestamp_ms, Some(1_714_564_800_000));
        assert_eq!(detail.duration_ms, Some(61_000));
        assert_eq!(detail.actions.len(), 2);
    }

    #[tokio::test]
    async fn test_build_detail_rejects_non_json() {
        let mut server = mockito::Server::new_async().await;
        server
            .mock("GET", "/job/api/42/api/json")
            .with_status(200)
            .with_body("<html>login</html>")
            .create_async()
            .await;

        let err = client_for(&server)
            .get_build_detail("job/api", 42)
            .await
            .unwrap_err();
        assert!(matches!(err, SentinelError::Decode { .. }));
    }

    #[tokio::test]
    async fn test_console_log_returns_plain_text() {
        let mut server = mockito::Server::new_async().await;
        server
            .mock("GET", "/job/api/42/consoleText")
            .with_status(200)
            .with_body("Started by user Ada\nFinished: FAILURE\n")
            .create_async()
            .await;

        let log = client_for(&server).get_console_log("job/api", 42).await.unwrap();
        assert!(log.ends_with("Finished: FAILURE\n"));
    }
}
