//! Default TOML config template with inline documentation comments.

/// Generate the default TOML config content with comments.
pub(crate) fn default_config_toml() -> String {
    r##"# Parley Configuration
# Schema version 1
# Only override what you want to change -- missing fields use defaults.

[server]
# listen = "0.0.0.0:8080"
# max_frame_bytes = 32768     # per-frame transport ceiling, >= 1024

[session]
# ttl_secs = 120              # fragment sessions expire this long after START
# reap_interval_secs = 60
# page_size = 100

[model]
# api_url = "https://api.anthropic.com/v1/messages"
# api_key_env = "ANTHROPIC_API_KEY"
# default_model = "claude-v3-haiku"
# rewrite_model = "claude-v3-haiku"
# request_timeout_secs = 300

[retry]
# max_retries = 3             # throttled calls only
# backoff_step_secs = 5       # retry n waits n * step

[agent]
# max_iterations = 15         # 1-100

[auth]
# jwt_secret_env = "PARLEY_JWT_SECRET"

[logging]
# level = "parley=info"

# [[models]]
# alias = "claude-v3-haiku"
# model_id = "claude-3-haiku-20240307"
# input_price_per_1k = 0.00025
# output_price_per_1k = 0.00125

# [[bots]]
# id = "support"
# owner = ""                  # empty = shared with every user
# title = "Support"
# instruction = "You answer questions about our products."
# display_retrieved_chunks = true
# tools = []                  # "today", "calculator"
#
# [[bots.documents]]
# source = "https://example.com/faq"
# content = "Returns are accepted within 30 days."
"##
    .to_string()
}
