#![allow(dead_code)]

use anyhow::{anyhow, Error};
use async_trait::async_trait;
use mediaq::functions::{FunctionResponse, Functions};
use mediaq::memory::MemoryStore;
use mediaq::{Job, JobType};
use serde_json::{json, Value};
use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex};
use uuid::Uuid;

/// Answers generation calls from per-function queues and records every call.
#[derive(Default)]
pub struct ScriptedFunctions {
    responses: Mutex<HashMap<String, VecDeque<Result<FunctionResponse, String>>>>,
    fallback: Mutex<HashMap<String, FunctionResponse>>,
    calls: Mutex<Vec<(String, Value)>>,
}

impl ScriptedFunctions {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn respond(&self, name: &str, response: FunctionResponse) {
        self.push(name, Ok(response));
    }

    pub fn fail_transport(&self, name: &str, message: &str) {
        self.push(name, Err(message.to_string()));
    }

    /// Used once the queue for `name` is empty.
    pub fn always(&self, name: &str, response: FunctionResponse) {
        self.fallback
            .lock()
            .unwrap()
            .insert(name.to_string(), response);
    }

    pub fn calls(&self) -> Vec<(String, Value)> {
        self.calls.lock().unwrap().clone()
    }

    pub fn calls_to(&self, name: &str) -> Vec<Value> {
        self.calls()
            .into_iter()
            .filter(|(called, _)| called == name)
            .map(|(_, payload)| payload)
            .collect()
    }

    fn push(&self, name: &str, response: Result<FunctionResponse, String>) {
        self.responses
            .lock()
            .unwrap()
            .entry(name.to_string())
            .or_default()
            .push_back(response);
    }
}

#[async_trait]
impl Functions for ScriptedFunctions {
    async fn invoke(&self, name: &str, payload: Value) -> Result<FunctionResponse, Error> {
        self.calls
            .lock()
            .unwrap()
            .push((name.to_string(), payload));
        let queued = self
            .responses
            .lock()
            .unwrap()
            .get_mut(name)
            .and_then(VecDeque::pop_front);
        match queued {
            Some(Ok(response)) => Ok(response),
            Some(Err(message)) => Err(anyhow!(message)),
            None => self
                .fallback
                .lock()
                .unwrap()
                .get(name)
                .cloned()
                .ok_or_else(|| anyhow!("no scripted response for {}", name)),
        }
    }
}

pub fn image_ok(url: &str) -> FunctionResponse {
    FunctionResponse::ok(json!({ "images": [{ "image_url": url, "provider": "z-image" }] }))
}

pub fn video_submitted(handle: &str) -> FunctionResponse {
    FunctionResponse::ok(json!({ "job": { "veo_uuid": handle, "status": 1 } }))
}

pub fn image_job(store: &MemoryStore, user: Uuid, session: &str, segment: i32) -> Uuid {
    let mut job = Job::new(JobType::Image, user, session, segment);
    job.visual_prompt = Some(format!("shot {segment}"));
    store.insert(job)
}

pub fn video_job(store: &MemoryStore, user: Uuid, session: &str, segment: i32, image_url: Option<&str>) -> Uuid {
    let mut job = Job::new(JobType::Video, user, session, segment);
    job.image_url = image_url.map(str::to_string);
    store.insert(job)
}
