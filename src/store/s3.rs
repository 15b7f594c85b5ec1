use std::time::SystemTime;

use aws_credential_types::Credentials;
use aws_sigv4::http_request::{
    PayloadChecksumKind, PercentEncodingMode, SignableBody, SignableRequest, SigningParams,
    SigningSettings, UriPathNormalizationMode, sign,
};
use aws_sigv4::sign::v4;
use reqwest::Client;
use tracing::debug;
use url::Url;

use super::{ObjectStore, PutObject, StoreError};
use crate::config::{Config, S3Credentials};

const SERVICE: &str = "s3";
const PROVIDER_NAME: &str = "s3-metrics-relay";

/// Path-style S3 `PutObject` client, signed with SigV4.
pub struct S3Client {
    client: Client,
    endpoint: Url,
    bucket: String,
    region: String,
    credentials: Credentials,
}

impl S3Client {
    pub fn new(config: &Config, credentials: &S3Credentials) -> Result<Self, StoreError> {
        let client = Client::builder().timeout(config.upload_timeout).build()?;

        Ok(Self {
            client,
            endpoint: config.endpoint.clone(),
            bucket: config.bucket.clone(),
            region: config.region.clone(),
            credentials: Credentials::new(
                credentials.access_key_id.clone(),
                credentials.secret_access_key.clone(),
                credentials.session_token.clone(),
                None,
                PROVIDER_NAME,
            ),
        })
    }

    /// `<endpoint>/<bucket>/<key>`, each key segment percent-encoded.
    fn object_url(&self, key: &str) -> Result<Url, StoreError> {
        object_url(&self.endpoint, &self.bucket, key)
    }

    fn signed_headers(
        &self,
        url: &Url,
        headers: &[(&'static str, String)],
        body: &[u8],
    ) -> Result<Vec<(String, String)>, StoreError> {
        let mut settings = SigningSettings::default();
        settings.percent_encoding_mode = PercentEncodingMode::Single;
        settings.payload_checksum_kind = PayloadChecksumKind::XAmzSha256;
        settings.uri_path_normalization_mode = UriPathNormalizationMode::Disabled;

        let identity = self.credentials.clone().into();
        let params: SigningParams<'_> = v4::SigningParams::builder()
            .identity(&identity)
            .region(&self.region)
            .name(SERVICE)
            .time(SystemTime::now())
            .settings(settings)
            .build()
            .map_err(|e| StoreError::Signing(e.to_string()))?
            .into();

        let signable = SignableRequest::new(
            "PUT",
            url.as_str(),
            headers.iter().map(|(k, v)| (*k, v.as_str())),
            SignableBody::Bytes(body),
        )
        .map_err(|e| StoreError::Signing(e.to_string()))?;

        let (instructions, _signature) = sign(signable, &params)
            .map_err(|e| StoreError::Signing(e.to_string()))?
            .into_parts();

        Ok(instructions
            .headers()
            .map(|(k, v)| (k.to_owned(), v.to_owned()))
            .collect())
    }
}

pub(crate) fn object_url(endpoint: &Url, bucket: &str, key: &str) -> Result<Url, StoreError> {
    let mut url = endpoint.clone();
    url.path_segments_mut()
        .map_err(|()| StoreError::InvalidUrl(endpoint.to_string()))?
        .pop_if_empty()
        .push(bucket)
        .extend(key.split('/'));
    Ok(url)
}

impl ObjectStore for S3Client {
    async fn put_object(&self, object: &PutObject) -> Result<(), StoreError> {
        let url = self.object_url(&object.key)?;
        let headers = [
            ("content-type", object.content_type.to_owned()),
            ("content-encoding", object.content_encoding.to_owned()),
            ("content-length", object.content_length.to_string()),
        ];
        let auth = self.signed_headers(&url, &headers, &object.body)?;

        let mut req = self.client.put(url);
        for (k, v) in headers.iter() {
            req = req.header(*k, v.as_str());
        }
        for (k, v) in &auth {
            req = req.header(k.as_str(), v.as_str());
        }

        let resp = req.body(object.body.clone()).send().await?;
        let status = resp.status();
        if status.is_success() {
            debug!(key = %object.key, bytes = object.content_length, "object stored");
            Ok(())
        } else {
            let body = resp.text().await.unwrap_or_default();
            Err(StoreError::Rejected {
                status: status.as_u16(),
                body,
            })
        }
    }
}
