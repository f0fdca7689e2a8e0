use crate::functions::FunctionResponse;
use crate::processor::{Failure, Interpretation, JobKind};
use crate::{Job, JobPatch, JobType};
use serde_json::{json, Value};

pub const FUNCTION_NAME: &str = "generate-images";
pub const DEFAULT_STYLE: &str = "cinematic";
pub const DEFAULT_ASPECT_RATIO: &str = "9:16";
pub const DEFAULT_PROVIDER: &str = "z-image";

/// Image jobs complete synchronously: the function answers with the generated image.
#[derive(Debug, Clone, Copy, Default)]
pub struct ImageJobs;

impl JobKind for ImageJobs {
    fn job_type(&self) -> JobType {
        JobType::Image
    }

    fn function_name(&self) -> &'static str {
        FUNCTION_NAME
    }

    fn prepare_request(&self, job: &Job) -> Value {
        json!({
            "segments": [{
                "segment_id": job.segment_id,
                "segment_number": job.segment_number,
                "visual_prompt": job.visual_prompt,
                "segment_type": job.segment_type,
            }],
            "style": job.style.as_deref().unwrap_or(DEFAULT_STYLE),
            "aspect_ratio": job.aspect_ratio.as_deref().unwrap_or(DEFAULT_ASPECT_RATIO),
            "provider": job.provider.as_deref().unwrap_or(DEFAULT_PROVIDER),
            "user_id": job.user_id,
            "session_id": job.session_id,
            "background_mode": true,
        })
    }

    fn interpret_result(&self, response: &FunctionResponse) -> Interpretation {
        if response.success {
            let image = response
                .data
                .as_ref()
                .and_then(|data| data.get("images"))
                .and_then(|images| images.get(0));
            if let Some(image) = image {
                let url = ["image_url", "url"]
                    .into_iter()
                    .find_map(|key| image.get(key).and_then(Value::as_str))
                    .filter(|url| !url.is_empty());
                if let Some(url) = url {
                    return Interpretation::Completed(JobPatch {
                        image_url: Some(url.to_string()),
                        metadata: Some(image.clone()),
                        ..Default::default()
                    });
                }
            }
        }
        Interpretation::Failed(Failure::classify(response.error_message()))
    }
}
