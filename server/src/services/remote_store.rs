use serde::Serialize;
use tracing::debug;
use zonemap_engine::{RemoteError, RemoteFuture, RemoteStore};
use zonemap_shared::{PlanDocument, UnitFeature, UnitId};

/// Remote document store spoken to over HTTP JSON.
///
/// `POST {base}/units` with `{"ids": [...]}` returns unit features;
/// `POST {base}/unassigned` with a plan document returns a GeoJSON
/// feature collection.
pub struct HttpRemoteStore {
    client: reqwest::Client,
    base_url: reqwest::Url,
}

#[derive(Serialize)]
struct UnitsRequest<'a> {
    ids: &'a [UnitId],
}

impl HttpRemoteStore {
    pub fn new(client: reqwest::Client, base_url: &str) -> Result<Self, RemoteError> {
        let mut base = base_url.trim().to_string();
        if !base.ends_with('/') {
            base.push('/');
        }
        let base_url = reqwest::Url::parse(&base)
            .map_err(|e| RemoteError::Transport(format!("invalid remote store URL {base_url:?}: {e}")))?;
        Ok(Self { client, base_url })
    }

    fn endpoint(&self, path: &str) -> Result<reqwest::Url, RemoteError> {
        self.base_url
            .join(path)
            .map_err(|e| RemoteError::Transport(e.to_string()))
    }

    async fn post_json<B, T>(&self, path: &str, body: B) -> Result<T, RemoteError>
    where
        B: Serialize,
        T: serde::de::DeserializeOwned,
    {
        let url = self.endpoint(path)?;
        debug!(%url, "remote store request");
        let resp = self
            .client
            .post(url)
            .json(&body)
            .send()
            .await
            .map_err(|e| RemoteError::Transport(e.to_string()))?;
        let status = resp.status();
        if !status.is_success() {
            return Err(RemoteError::Transport(format!("remote store answered {status}")));
        }
        let bytes = resp
            .bytes()
            .await
            .map_err(|e| RemoteError::Transport(e.to_string()))?;
        serde_json::from_slice(&bytes).map_err(|e| RemoteError::Decode(e.to_string()))
    }
}

impl RemoteStore for HttpRemoteStore {
    fn unit_geometries<'a>(&'a self, unit_ids: &'a [UnitId]) -> RemoteFuture<'a, Vec<UnitFeature>> {
        Box::pin(self.post_json("units", UnitsRequest { ids: unit_ids }))
    }

    fn unassigned_regions<'a>(
        &'a self,
        plan: &'a PlanDocument,
    ) -> RemoteFuture<'a, geojson::FeatureCollection> {
        Box::pin(self.post_json("unassigned", plan))
    }
}
