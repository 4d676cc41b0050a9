use crate::video::export_planner::ResolutionProfile;

/// Operations that can be triggered from outside the process.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RemoteCommand {
    Screenshot,
    NextSegment,
    PreviousSegment,
    Step(i64),
    Play,
    Pause,
    Toggle,
    SetIn,
    SetOut,
    GotoIn,
    GotoOut,
    Seek(u64),
    Mark,
    Unmark,
    NextMark,
    PreviousMark,
    /// Export the marked range, optionally under a new output name
    Export(Option<String>),
    Confirm,
    /// Switch the export resolution profile (`profile 320`)
    Profile(ResolutionProfile),
    Mirror,
    Quit,
}

impl RemoteCommand {
    /// Parses one command line such as `step -24` or `export intro_loop`.
    /// Unknown actions and malformed arguments yield None.
    pub fn parse(line: &str) -> Option<Self> {
        let mut parts = line.split_whitespace();
        let action = parts.next()?.to_lowercase();

        let command = match action.as_str() {
            "screenshot" => Self::Screenshot,
            "next" => Self::NextSegment,
            "prev" => Self::PreviousSegment,
            "step" => Self::Step(parts.next()?.parse().ok()?),
            "play" => Self::Play,
            "pause" => Self::Pause,
            "toggle" => Self::Toggle,
            "setin" => Self::SetIn,
            "setout" => Self::SetOut,
            "gotoin" => Self::GotoIn,
            "gotoout" => Self::GotoOut,
            "seek" => Self::Seek(parts.next()?.parse().ok()?),
            "mark" => Self::Mark,
            "unmark" => Self::Unmark,
            "nextmark" => Self::NextMark,
            "prevmark" => Self::PreviousMark,
            "export" => {
                let name = parts.collect::<Vec<_>>().join(" ");
                Self::Export(if name.is_empty() { None } else { Some(name) })
            }
            "confirm" => Self::Confirm,
            "profile" => Self::Profile(ResolutionProfile::parse(parts.next()?)?),
            "mirror" => Self::Mirror,
            "quit" => Self::Quit,
            _ => return None,
        };
        Some(command)
    }

    /// Parses every line of a command file, skipping blank and unknown ones.
    pub fn parse_script(text: &str) -> Vec<Self> {
        text.lines()
            .filter(|line| !line.trim().is_empty())
            .filter_map(|line| {
                let command = Self::parse(line);
                if command.is_none() {
                    log::debug!("Ignoring remote command: {}", line.trim());
                }
                command
            })
            .collect()
    }
}
