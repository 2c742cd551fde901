//! The `skilltrack init` command.

use std::path::Path;

use anyhow::Result;

pub fn execute() -> Result<()> {
    if Path::new("skilltrack.toml").exists() {
        println!("skilltrack.toml already exists, skipping.");
    } else {
        std::fs::write("skilltrack.toml", SAMPLE_CONFIG)?;
        println!("Created skilltrack.toml");
    }

    write_example("definitions/quizzes", "example.toml", EXAMPLE_QUIZ)?;
    write_example("definitions/trainings", "example.toml", EXAMPLE_TRAINING)?;

    println!("\nNext steps:");
    println!("  1. Edit skilltrack.toml to point at your certificate service");
    println!("  2. Run: skilltrack validate --path definitions");
    println!(
        "  3. Run: skilltrack simulate --training definitions/trainings/example.toml --quizzes definitions/quizzes"
    );

    Ok(())
}

fn write_example(dir: &str, file: &str, content: &str) -> Result<()> {
    std::fs::create_dir_all(dir)?;
    let path = Path::new(dir).join(file);
    if path.exists() {
        println!("{} already exists, skipping.", path.display());
    } else {
        std::fs::write(&path, content)?;
        println!("Created {}", path.display());
    }
    Ok(())
}

const SAMPLE_CONFIG: &str = r#"# skilltrack configuration

[engine]
max_cas_retries = 5
certificate_max_retries = 3
# Seconds before the first certificate retry; doubles per retry, capped at 60.
certificate_retry_delay = 1.0
# Seconds of slack after a quiz deadline before auto-submit fires.
auto_submit_grace = 0
schedule_timeouts = true

# Use type = "noop" to issue placeholder certificate ids locally.
[issuer]
type = "http"
base_url = "https://certificates.example.com/api"
token = "${SKILLTRACK_ISSUER_TOKEN}"
timeout_secs = 30
"#;

const EXAMPLE_QUIZ: &str = r#"[quiz]
id = "example-quiz"
title = "Example Quiz"
passing_score_percent = 70
duration_minutes = 15
max_attempts = 3
shuffle_questions = true
state = "published"

[[questions]]
id = "q1"
text = "Which command checks definitions for authoring mistakes?"
type = "single_choice"
points = 1

[[questions.options]]
id = "a"
text = "skilltrack validate"
correct = true

[[questions.options]]
id = "b"
text = "skilltrack init"

[[questions]]
id = "q2"
text = "Which material types can a training module have?"
type = "multiple_choice"
points = 2

[[questions.options]]
id = "a"
text = "video"
correct = true

[[questions.options]]
id = "b"
text = "quiz"
correct = true

[[questions.options]]
id = "c"
text = "spreadsheet"

[[questions]]
id = "q3"
text = "A passing attempt completes the quiz module it is linked to."
type = "true_false"
points = 1

[[questions.options]]
id = "true"
text = "True"
correct = true

[[questions.options]]
id = "false"
text = "False"
"#;

const EXAMPLE_TRAINING: &str = r#"[training]
id = "example-training"
title = "Example Training"
description = "Watch the intro, read the guide, then pass the quiz."

[[modules]]
id = "intro"
title = "Introduction"
material_type = "video"

[[modules]]
id = "guide"
title = "Authoring guide"
material_type = "document"

[[modules]]
id = "further-reading"
title = "Further reading"
material_type = "link"
mandatory = false

[[modules]]
id = "check"
title = "Knowledge check"
material_type = "quiz"
quiz_id = "example-quiz"
"#;
