use posepipe_link::{ClientConfig, ClientTransport};
use tracing::info;

use crate::cmd::{parse_duration, SendArgs};
use crate::exit::{link_error, CliResult, SUCCESS};

pub fn run(args: SendArgs) -> CliResult<i32> {
    let client = ClientTransport::new(ClientConfig {
        busy_timeout: parse_duration(&args.timeout)?,
        ..ClientConfig::default()
    });

    client
        .connect(&args.endpoint)
        .map_err(|err| link_error("connect failed", err))?;
    client
        .send_command(&args.name, &args.params)
        .map_err(|err| link_error("send failed", err))?;
    client.disconnect();

    info!(name = %args.name, endpoint = ?args.endpoint, "command sent");
    Ok(SUCCESS)
}
