//! Caller-side task submissions.

use serde_json::Value;

use crate::codec::{self, Args, CALLBACK_HANDLE_KEY, TASK_HANDLE_KEY, TypedValue, WorkData};
use crate::error::{CodecError, Error, SubmitError};
use crate::scheduler::{ExistingWorkPolicy, JobRequest};

/// Unique-name placement for a submission.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UniqueWork {
    pub name: String,
    pub policy: ExistingWorkPolicy,
}

/// One unit of work to enqueue.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct TaskSubmission {
    pub callback_handle: Option<i64>,
    pub task_handle: Option<i64>,
    pub task_id: String,
    pub tag: Option<String>,
    pub args: Args,
    pub unique: Option<UniqueWork>,
}

impl TaskSubmission {
    pub fn new(task_id: impl Into<String>) -> Self {
        Self {
            task_id: task_id.into(),
            ..Self::default()
        }
    }

    pub fn callback_handle(mut self, handle: i64) -> Self {
        self.callback_handle = Some(handle);
        self
    }

    pub fn task_handle(mut self, handle: i64) -> Self {
        self.task_handle = Some(handle);
        self
    }

    pub fn tag(mut self, tag: impl Into<String>) -> Self {
        self.tag = Some(tag.into());
        self
    }

    pub fn arg(mut self, field: impl Into<String>, value: impl Into<TypedValue>) -> Self {
        self.args.insert(field.into(), value.into());
        self
    }

    pub fn args(mut self, args: Args) -> Self {
        self.args.extend(args);
        self
    }

    pub fn unique(mut self, name: impl Into<String>, policy: ExistingWorkPolicy) -> Self {
        self.unique = Some(UniqueWork {
            name: name.into(),
            policy,
        });
        self
    }

    /// Parse the loosely-typed call form:
    /// `{callbackHandle, taskHandle, taskId, tag?, args?}` where `args` maps
    /// field names to `{platformKey, value}` objects.
    pub fn from_json(raw: &Value) -> Result<Self, Error> {
        let obj = raw.as_object().ok_or_else(|| CodecError::Malformed {
            field: "submission".to_string(),
        })?;

        let args = match obj.get("args") {
            None | Some(Value::Null) => Args::new(),
            Some(Value::Object(map)) => codec::parse_args(map)?,
            Some(_) => {
                return Err(CodecError::Malformed {
                    field: "args".to_string(),
                }
                .into());
            }
        };

        Ok(Self {
            callback_handle: obj.get(CALLBACK_HANDLE_KEY).and_then(Value::as_i64),
            task_handle: obj.get(TASK_HANDLE_KEY).and_then(Value::as_i64),
            task_id: obj
                .get("taskId")
                .and_then(Value::as_str)
                .unwrap_or_default()
                .to_string(),
            tag: obj.get("tag").and_then(Value::as_str).map(String::from),
            args,
            unique: None,
        })
    }

    /// Boundary checks run before anything reaches the scheduler.
    pub fn validate(&self) -> Result<(), SubmitError> {
        if self.callback_handle.is_none() {
            return Err(SubmitError::MissingHandle {
                handle: CALLBACK_HANDLE_KEY,
            });
        }
        if self.task_handle.is_none() {
            return Err(SubmitError::MissingHandle {
                handle: TASK_HANDLE_KEY,
            });
        }
        if self.task_id.trim().is_empty() {
            return Err(SubmitError::EmptyTaskId);
        }
        if let Some(unique) = &self.unique
            && unique.name.trim().is_empty()
        {
            return Err(SubmitError::EmptyUniqueName);
        }
        Ok(())
    }

    /// Validate and encode into a job request. The tag, if any, is also
    /// attached as a scheduler tag so tag queries can use it.
    pub fn to_request(&self) -> Result<JobRequest, Error> {
        self.validate()?;

        let mut builder = WorkData::builder();
        if let Some(h) = self.callback_handle {
            builder.put_long(CALLBACK_HANDLE_KEY, h);
        }
        if let Some(h) = self.task_handle {
            builder.put_long(TASK_HANDLE_KEY, h);
        }
        codec::encode_into(&mut builder, &self.args)?;

        let mut request = JobRequest::new(builder.build()?);
        if let Some(tag) = &self.tag {
            request = request.with_tag(tag.clone());
        }
        Ok(request)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn missing_handles_are_rejected_first() {
        let sub = TaskSubmission::new("t1").task_handle(2);
        assert!(matches!(
            sub.validate(),
            Err(SubmitError::MissingHandle { handle: CALLBACK_HANDLE_KEY })
        ));

        let sub = TaskSubmission::new("t1").callback_handle(1);
        assert_eq!(sub.validate().unwrap_err().code(), "invalid_handle");

        let sub = TaskSubmission::new(" ").callback_handle(1).task_handle(2);
        assert!(matches!(sub.validate(), Err(SubmitError::EmptyTaskId)));

        let sub = TaskSubmission::new("t1")
            .callback_handle(1)
            .task_handle(2)
            .unique("", ExistingWorkPolicy::Replace);
        assert!(matches!(sub.validate(), Err(SubmitError::EmptyUniqueName)));
    }

    #[test]
    fn request_carries_handles_args_and_tag() {
        let request = TaskSubmission::new("t1")
            .callback_handle(1)
            .task_handle(2)
            .tag("sync")
            .arg("count", 5i64)
            .to_request()
            .unwrap();

        assert_eq!(request.tags, vec!["sync".to_string()]);
        assert_eq!(request.input.get_long(CALLBACK_HANDLE_KEY), Some(1));
        assert_eq!(request.input.get_long(TASK_HANDLE_KEY), Some(2));
        assert_eq!(request.input.get_long("count"), Some(5));
    }

    #[test]
    fn reserved_arg_names_are_rejected() {
        let err = TaskSubmission::new("t1")
            .callback_handle(1)
            .task_handle(2)
            .arg(TASK_HANDLE_KEY, 9i64)
            .to_request()
            .unwrap_err();
        assert_eq!(err.code(), "codec");
    }

    #[test]
    fn parses_call_form() {
        let sub = TaskSubmission::from_json(&json!({
            "callbackHandle": 11,
            "taskHandle": 22,
            "taskId": "t1",
            "tag": "tagA",
            "args": { "count": { "platformKey": "int", "value": 5 } }
        }))
        .unwrap();

        assert_eq!(sub.callback_handle, Some(11));
        assert_eq!(sub.tag.as_deref(), Some("tagA"));
        assert_eq!(sub.args["count"], TypedValue::Int(5));
    }

    #[test]
    fn call_form_without_handles_fails_validation() {
        let sub = TaskSubmission::from_json(&json!({ "taskId": "t1" })).unwrap();
        assert_eq!(sub.to_request().unwrap_err().code(), "invalid_handle");
    }

    #[test]
    fn call_form_with_unknown_tag_is_a_codec_error() {
        let err = TaskSubmission::from_json(&json!({
            "callbackHandle": 1,
            "taskHandle": 2,
            "taskId": "t1",
            "args": { "m": { "platformKey": "Map<String,int>", "value": {} } }
        }))
        .unwrap_err();
        assert!(matches!(err, Error::Codec(CodecError::UnsupportedTag { .. })));
    }
}
