//! Fetch-URL codec.
//!
//! ```text
//! http://host:port/?sid=<stage>&p=<partition>&type=h&ta=<task>_<attempt>[&ta=...]
//! http://host:port/?sid=<stage>&p=<partition>&type=r&ta=<task>_<attempt>&start=<b64>&end=<b64>[&final=1]
//! ```
//!
//! [`FetchRequest`] is the query part, which is all the pull service sees;
//! [`FetchDescriptor`] adds the address of the pull service to contact.

use std::borrow::Cow;
use std::fmt;

use serde::{Deserialize, Serialize};
use url::{Host, Url};

use crate::error::{Error, Result};
use crate::intermediate::{PartitionType, PullAddress, TaskAttempt};
use crate::key_codec::{from_base64, to_base64};

/// What part of each named task's output is requested.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FetchKind {
    /// The whole partition file `output/<partition id>`.
    Hash,
    /// The rows between two encoded keys of a sorted output file.
    Range {
        start: Vec<u8>,
        end: Vec<u8>,
        /// Upper offset clamps to end of file instead of an index lookup.
        is_final: bool,
    },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FetchRequest {
    pub stage_id: u32,
    /// Hash bucket; a placeholder for range requests.
    pub partition_id: u32,
    pub kind: FetchKind,
    /// Sorted and free of duplicates; `ta` parameters form a set.
    pub attempts: Vec<TaskAttempt>,
}

impl FetchRequest {
    pub fn hash(stage_id: u32, partition_id: u32, attempts: Vec<TaskAttempt>) -> Self {
        Self {
            stage_id,
            partition_id,
            kind: FetchKind::Hash,
            attempts: normalize(attempts),
        }
    }

    pub fn range(
        stage_id: u32,
        attempts: Vec<TaskAttempt>,
        start: Vec<u8>,
        end: Vec<u8>,
        is_final: bool,
    ) -> Self {
        Self {
            stage_id,
            partition_id: 0,
            kind: FetchKind::Range {
                start,
                end,
                is_final,
            },
            attempts: normalize(attempts),
        }
    }

    pub fn partition_type(&self) -> PartitionType {
        match self.kind {
            FetchKind::Hash => PartitionType::Hash,
            FetchKind::Range { .. } => PartitionType::Range,
        }
    }

    /// Encode as a query string (without the leading `?`).
    pub fn to_query(&self) -> String {
        let mut ser = url::form_urlencoded::Serializer::new(String::new());
        ser.append_pair("sid", &self.stage_id.to_string())
            .append_pair("p", &self.partition_id.to_string())
            .append_pair("type", self.partition_type().wire_code());
        for ta in &self.attempts {
            ser.append_pair("ta", &ta.to_string());
        }
        if let FetchKind::Range {
            start,
            end,
            is_final,
        } = &self.kind
        {
            ser.append_pair("start", &to_base64(start))
                .append_pair("end", &to_base64(end));
            if *is_final {
                ser.append_pair("final", "1");
            }
        }
        ser.finish()
    }

    pub fn from_query(query: &str) -> Result<Self> {
        Self::from_pairs(url::form_urlencoded::parse(query.as_bytes()))
    }

    /// Decode from already-split query parameters. Unknown parameters are
    /// ignored; for single-valued parameters the first occurrence wins.
    pub fn from_pairs<'a, I>(pairs: I) -> Result<Self>
    where
        I: IntoIterator<Item = (Cow<'a, str>, Cow<'a, str>)>,
    {
        let mut sid = None;
        let mut partition = None;
        let mut kind = None;
        let mut start = None;
        let mut end = None;
        let mut is_final = false;
        let mut attempts = Vec::new();

        for (key, value) in pairs {
            match key.as_ref() {
                "sid" => {
                    sid.get_or_insert(value.into_owned());
                }
                "p" => {
                    partition.get_or_insert(value.into_owned());
                }
                "type" => {
                    kind.get_or_insert(value.into_owned());
                }
                "start" => {
                    start.get_or_insert(value.into_owned());
                }
                "end" => {
                    end.get_or_insert(value.into_owned());
                }
                "final" => is_final = true,
                "ta" => {
                    for part in value.split(',').filter(|s| !s.is_empty()) {
                        attempts.push(part.parse::<TaskAttempt>()?);
                    }
                }
                _ => {}
            }
        }

        let stage_id = parse_u32("sid", sid)?;
        let partition_id = parse_u32("p", partition)?;
        let kind = kind.ok_or_else(|| missing("type"))?;
        let partition_type = PartitionType::from_wire_code(&kind)
            .ok_or_else(|| Error::MalformedRequest(format!("unknown partition type '{}'", kind)))?;
        if attempts.is_empty() {
            return Err(missing("ta"));
        }

        let kind = match partition_type {
            PartitionType::Hash => FetchKind::Hash,
            PartitionType::Range => FetchKind::Range {
                start: from_base64(&start.ok_or_else(|| missing("start"))?)?,
                end: from_base64(&end.ok_or_else(|| missing("end"))?)?,
                is_final,
            },
        };

        Ok(Self {
            stage_id,
            partition_id,
            kind,
            attempts: normalize(attempts),
        })
    }
}

fn normalize(mut attempts: Vec<TaskAttempt>) -> Vec<TaskAttempt> {
    attempts.sort_unstable();
    attempts.dedup();
    attempts
}

fn missing(param: &str) -> Error {
    Error::MalformedRequest(format!("missing '{}' parameter", param))
}

fn parse_u32(param: &str, value: Option<String>) -> Result<u32> {
    let value = value.ok_or_else(|| missing(param))?;
    value.parse().map_err(|_| {
        Error::MalformedRequest(format!("'{}' is not a valid {} value", value, param))
    })
}

/// A fetch request bound to the pull service that can answer it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(into = "String", try_from = "String")]
pub struct FetchDescriptor {
    pub address: PullAddress,
    pub request: FetchRequest,
}

impl FetchDescriptor {
    pub fn new(address: PullAddress, request: FetchRequest) -> Self {
        Self { address, request }
    }

    pub fn to_url(&self) -> Result<Url> {
        let mut url = Url::parse(&format!("http://{}/", self.address)).map_err(|e| {
            Error::MalformedRequest(format!("invalid pull address {}: {}", self.address, e))
        })?;
        url.set_query(Some(&self.request.to_query()));
        Ok(url)
    }

    pub fn parse(url: &str) -> Result<Self> {
        let url = Url::parse(url)
            .map_err(|e| Error::MalformedRequest(format!("invalid fetch URL '{}': {}", url, e)))?;
        let host = match url.host() {
            Some(Host::Ipv6(addr)) => addr.to_string(),
            Some(host) => host.to_string(),
            None => {
                return Err(Error::MalformedRequest(format!(
                    "fetch URL '{}' has no host",
                    url
                )))
            }
        };
        let port = url
            .port_or_known_default()
            .ok_or_else(|| Error::MalformedRequest(format!("fetch URL '{}' has no port", url)))?;
        let request = FetchRequest::from_pairs(url.query_pairs())?;
        Ok(Self::new(PullAddress::new(host, port), request))
    }
}

impl fmt::Display for FetchDescriptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "http://{}/?{}", self.address, self.request.to_query())
    }
}

impl From<FetchDescriptor> for String {
    fn from(value: FetchDescriptor) -> Self {
        value.to_string()
    }
}

impl TryFrom<String> for FetchDescriptor {
    type Error = Error;

    fn try_from(value: String) -> Result<Self> {
        Self::parse(&value)
    }
}
