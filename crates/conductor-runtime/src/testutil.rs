//! In-memory stand-in for the collaboration platform.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use conductor_core::{AgentSessionId, IssueId};
use parking_lot::Mutex;

use crate::capabilities::{
    Capabilities, CapabilityError, ChildSpec, IssueCreator, PromptPoster, TriggerPoster,
};

/// Records every capability call and fails on demand.
#[derive(Default)]
pub(crate) struct FakePlatform {
    next_id: AtomicUsize,
    created: Mutex<Vec<String>>,
    triggers: Mutex<Vec<(String, String)>>,
    prompts: Mutex<Vec<(String, String)>>,
    trigger_timeline: Mutex<Vec<String>>,
    fail_creation: AtomicBool,
    panic_creation: AtomicBool,
    slow_triggers: AtomicBool,
    fail_triggers: AtomicBool,
    fail_prompts: AtomicBool,
    decline_prompts: AtomicBool,
}

impl FakePlatform {
    pub(crate) fn capabilities(self: &Arc<Self>) -> Capabilities {
        Capabilities {
            issues: self.clone(),
            triggers: self.clone(),
            prompts: self.clone(),
        }
    }

    pub(crate) fn fail_creation(&self) {
        self.fail_creation.store(true, Ordering::SeqCst);
    }

    pub(crate) fn panic_on_creation(&self) {
        self.panic_creation.store(true, Ordering::SeqCst);
    }

    /// Each trigger sleeps before posting.
    pub(crate) fn slow_triggers(&self) {
        self.slow_triggers.store(true, Ordering::SeqCst);
    }

    /// `enter <child>` / `exit <child>` around every trigger call.
    pub(crate) fn trigger_timeline(&self) -> Vec<String> {
        self.trigger_timeline.lock().clone()
    }

    pub(crate) fn fail_triggers(&self) {
        self.fail_triggers.store(true, Ordering::SeqCst);
    }

    pub(crate) fn fail_prompts(&self) {
        self.fail_prompts.store(true, Ordering::SeqCst);
    }

    pub(crate) fn decline_prompts(&self) {
        self.decline_prompts.store(true, Ordering::SeqCst);
    }

    pub(crate) fn created_titles(&self) -> Vec<String> {
        self.created.lock().clone()
    }

    pub(crate) fn triggers(&self) -> Vec<(String, String)> {
        self.triggers.lock().clone()
    }

    pub(crate) fn prompts(&self) -> Vec<(String, String)> {
        self.prompts.lock().clone()
    }
}

#[async_trait]
impl IssueCreator for FakePlatform {
    async fn create_child_work_item(
        &self,
        _parent_id: &IssueId,
        spec: &ChildSpec,
    ) -> Result<IssueId, CapabilityError> {
        tokio::task::yield_now().await;
        assert!(
            !self.panic_creation.load(Ordering::SeqCst),
            "issue tracker client blew up"
        );
        if self.fail_creation.load(Ordering::SeqCst) {
            return Err(CapabilityError::retryable("platform unavailable"));
        }
        self.created.lock().push(spec.title.clone());
        let n = self.next_id.fetch_add(1, Ordering::SeqCst) + 1;
        Ok(IssueId::from(format!("child-{n}")))
    }
}

#[async_trait]
impl TriggerPoster for FakePlatform {
    async fn post_trigger_comment(
        &self,
        child_id: &IssueId,
        context: &str,
    ) -> Result<(), CapabilityError> {
        self.trigger_timeline.lock().push(format!("enter {child_id}"));
        if self.slow_triggers.load(Ordering::SeqCst) {
            tokio::time::sleep(Duration::from_millis(10)).await;
        } else {
            tokio::task::yield_now().await;
        }
        self.trigger_timeline.lock().push(format!("exit {child_id}"));
        if self.fail_triggers.load(Ordering::SeqCst) {
            return Err(CapabilityError::new("comment rejected"));
        }
        self.triggers
            .lock()
            .push((child_id.to_string(), context.to_owned()));
        Ok(())
    }
}

#[async_trait]
impl PromptPoster for FakePlatform {
    async fn post_prompt(
        &self,
        session_id: &AgentSessionId,
        content: &str,
    ) -> Result<bool, CapabilityError> {
        tokio::task::yield_now().await;
        if self.fail_prompts.load(Ordering::SeqCst) {
            return Err(CapabilityError::new("session gone"));
        }
        if self.decline_prompts.load(Ordering::SeqCst) {
            return Ok(false);
        }
        self.prompts
            .lock()
            .push((session_id.to_string(), content.to_owned()));
        Ok(true)
    }
}
