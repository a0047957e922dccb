//! Download manager tests, split by concern.

use std::sync::Arc;
use std::time::Duration;

use super::DownloadManager;
use super::test_helpers::*;
use crate::config::ResubmitPolicy;
use crate::error::{Error, FetchError};
use crate::types::{AbandonReason, Event, FailureKind, TaskState};
