use skein_contract::TaskKind;

/// One named automation step. The description doubles as the progress
/// message shown while the step runs.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WorkflowStep {
    pub name: &'static str,
    pub description: &'static str,
}

const fn step(name: &'static str, description: &'static str) -> WorkflowStep {
    WorkflowStep { name, description }
}

const SCRIPT_GENERATION_STEPS: &[WorkflowStep] = &[
    step("open_workbench", "opening the script workbench"),
    step("select_work_item", "selecting the next work item"),
    step("submit_prompt", "submitting the generation prompt"),
    step("await_generation", "waiting for generation to finish"),
    step("extract_script", "extracting the generated script"),
    step("save_script", "saving the script to the work item"),
];

const VIDEO_UPLOAD_STEPS: &[WorkflowStep] = &[
    step("open_studio", "opening the studio upload page"),
    step("start_upload", "starting a new upload"),
    step("select_file", "selecting the video file"),
    step("fill_title", "filling the video title"),
    step("fill_description", "filling the video description"),
    step("set_audience", "setting the audience options"),
    step("set_visibility", "setting visibility and publish time"),
    step("wait_processing", "waiting for upload processing"),
    step("click_publish", "publishing the video"),
    step("verify_published", "verifying the video is live"),
];

/// Returns the ordered step list executed for a task kind.
pub fn step_catalog(kind: TaskKind) -> &'static [WorkflowStep] {
    match kind {
        TaskKind::ScriptGeneration => SCRIPT_GENERATION_STEPS,
        TaskKind::VideoUpload => VIDEO_UPLOAD_STEPS,
    }
}
