/// Controller command set and interrupt classes

/// Commands understood by the CD-ROM controller
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum Command {
    /// Update the status byte and clear the shell-open flag
    Nop = 0x01,
    /// Set the seek target used by the next seek or read
    Setloc = 0x02,
    /// Begin CD-DA playback
    Play = 0x03,
    /// Fast-forward (CD-DA only)
    Forward = 0x04,
    /// Rewind (CD-DA only)
    Backward = 0x05,
    /// Begin reading sectors with automatic retry
    ReadN = 0x06,
    /// Start the spindle motor
    Standby = 0x07,
    /// Stop reading and the spindle motor
    Stop = 0x08,
    /// Stop reading without stopping the motor
    Pause = 0x09,
    /// Initialize the controller, aborting any command
    Init = 0x0A,
    /// Mute audio output
    Mute = 0x0B,
    /// Unmute audio output
    Demute = 0x0C,
    /// Configure the XA-ADPCM filter
    Setfilter = 0x0D,
    /// Set the mode byte
    Setmode = 0x0E,
    /// Return mode and filter settings
    Getparam = 0x0F,
    /// Return the header of the current data sector
    GetlocL = 0x10,
    /// Return the current physical position from subchannel Q
    GetlocP = 0x11,
    /// Seek to a session of a multi-session disc
    Setsession = 0x12,
    /// Return the first and last track numbers
    GetTN = 0x13,
    /// Return the start of a track
    GetTD = 0x14,
    /// Seek using data sector headers
    SeekL = 0x15,
    /// Seek using subchannel Q
    SeekP = 0x16,
    /// Test sub-command (raw packets only)
    Test = 0x19,
    /// Identify the disc
    GetID = 0x1A,
    /// Begin reading sectors in real-time mode (no automatic retry)
    ReadS = 0x1B,
    /// Reset the controller
    Reset = 0x1C,
    /// Read raw subchannel Q from the table of contents
    GetQ = 0x1D,
    /// Force the table of contents to be re-read
    ReadToc = 0x1E,
}

/// Parameter expected by a command when issued through the high-level calls
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ParamShape {
    /// No parameter
    None,
    /// Exactly this many bytes
    Required(usize),
    /// This many bytes, or nothing
    Optional(usize),
    /// An optional position, sent as a separate `Setloc`
    Location,
}

impl Command {
    /// All commands, in opcode order
    pub const ALL: [Command; 28] = [
        Command::Nop,
        Command::Setloc,
        Command::Play,
        Command::Forward,
        Command::Backward,
        Command::ReadN,
        Command::Standby,
        Command::Stop,
        Command::Pause,
        Command::Init,
        Command::Mute,
        Command::Demute,
        Command::Setfilter,
        Command::Setmode,
        Command::Getparam,
        Command::GetlocL,
        Command::GetlocP,
        Command::Setsession,
        Command::GetTN,
        Command::GetTD,
        Command::SeekL,
        Command::SeekP,
        Command::Test,
        Command::GetID,
        Command::ReadS,
        Command::Reset,
        Command::GetQ,
        Command::ReadToc,
    ];

    /// Raw opcode byte
    #[inline]
    pub fn opcode(self) -> u8 {
        self as u8
    }

    /// Look up a command by opcode
    pub fn from_opcode(opcode: u8) -> Option<Self> {
        Self::ALL.iter().copied().find(|c| c.opcode() == opcode)
    }

    /// Blocking commands answer with an acknowledge, then a second
    /// completion interrupt once they finish in the background
    pub fn is_blocking(self) -> bool {
        matches!(
            self,
            Command::Standby
                | Command::Stop
                | Command::Pause
                | Command::Init
                | Command::Setsession
                | Command::SeekL
                | Command::SeekP
                | Command::GetID
                | Command::GetQ
                | Command::ReadToc
        )
    }

    /// Commands that may take a position, sent ahead of them as `Setloc`
    pub fn takes_location(self) -> bool {
        matches!(
            self,
            Command::ReadN | Command::ReadS | Command::SeekL | Command::SeekP
        )
    }

    /// Commands whose response carries no status byte
    pub fn reports_status(self) -> bool {
        !matches!(self, Command::Test | Command::GetlocL | Command::GetlocP)
    }

    /// Parameter accepted by the high-level issue calls
    pub fn param_shape(self) -> ParamShape {
        match self {
            Command::Setloc => ParamShape::Required(3),
            Command::Setfilter => ParamShape::Required(2),
            Command::Setmode | Command::Setsession | Command::GetTD => ParamShape::Required(1),
            Command::GetQ => ParamShape::Required(2),
            Command::Play => ParamShape::Optional(1),
            Command::ReadN | Command::ReadS | Command::SeekL | Command::SeekP => {
                ParamShape::Location
            }
            _ => ParamShape::None,
        }
    }

    /// Lower-case command name as used by the shell
    pub fn name(self) -> &'static str {
        match self {
            Command::Nop => "nop",
            Command::Setloc => "setloc",
            Command::Play => "play",
            Command::Forward => "forward",
            Command::Backward => "backward",
            Command::ReadN => "readn",
            Command::Standby => "standby",
            Command::Stop => "stop",
            Command::Pause => "pause",
            Command::Init => "init",
            Command::Mute => "mute",
            Command::Demute => "demute",
            Command::Setfilter => "setfilter",
            Command::Setmode => "setmode",
            Command::Getparam => "getparam",
            Command::GetlocL => "getlocl",
            Command::GetlocP => "getlocp",
            Command::Setsession => "setsession",
            Command::GetTN => "gettn",
            Command::GetTD => "gettd",
            Command::SeekL => "seekl",
            Command::SeekP => "seekp",
            Command::Test => "test",
            Command::GetID => "getid",
            Command::ReadS => "reads",
            Command::Reset => "reset",
            Command::GetQ => "getq",
            Command::ReadToc => "readtoc",
        }
    }

    /// Look up a command by its shell name
    pub fn from_name(name: &str) -> Option<Self> {
        let name = name.to_ascii_lowercase();
        Self::ALL.iter().copied().find(|c| c.name() == name)
    }
}

/// Controller interrupt classes
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[repr(u8)]
pub enum IntrResult {
    /// No pending interrupt, command busy
    NoIntr = 0,
    /// INT1: a sector or report packet is available
    DataReady = 1,
    /// INT2: a blocking command has finished
    #[default]
    Complete = 2,
    /// INT3: a command has been acknowledged
    Acknowledge = 3,
    /// INT4: end of track or end of disc reached
    DataEnd = 4,
    /// INT5: command error, read error or lid opened
    DiskError = 5,
}

impl IntrResult {
    /// Decode the low three bits of the interrupt flag register
    pub fn from_bits(bits: u8) -> Self {
        match bits & 0x07 {
            1 => IntrResult::DataReady,
            2 => IntrResult::Complete,
            3 => IntrResult::Acknowledge,
            4 => IntrResult::DataEnd,
            5 => IntrResult::DiskError,
            _ => IntrResult::NoIntr,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_opcode_lookup() {
        for cmd in Command::ALL {
            assert_eq!(Command::from_opcode(cmd.opcode()), Some(cmd));
            assert_eq!(Command::from_name(cmd.name()), Some(cmd));
        }
        assert_eq!(Command::from_opcode(0x17), None);
        assert_eq!(Command::from_opcode(0x00), None);
    }

    #[test]
    fn test_blocking_classification() {
        assert!(Command::Pause.is_blocking());
        assert!(Command::Init.is_blocking());
        assert!(Command::SeekL.is_blocking());
        assert!(!Command::ReadN.is_blocking());
        assert!(!Command::Setloc.is_blocking());
        assert!(!Command::Nop.is_blocking());
    }

    #[test]
    fn test_location_commands() {
        let with_loc: Vec<Command> = Command::ALL
            .iter()
            .copied()
            .filter(|c| c.takes_location())
            .collect();
        assert_eq!(
            with_loc,
            vec![Command::ReadN, Command::SeekL, Command::SeekP, Command::ReadS]
        );
        assert_eq!(Command::ReadS.param_shape(), ParamShape::Location);
    }

    #[test]
    fn test_intr_from_bits() {
        assert_eq!(IntrResult::from_bits(0xE3), IntrResult::Acknowledge);
        assert_eq!(IntrResult::from_bits(5), IntrResult::DiskError);
        assert_eq!(IntrResult::from_bits(7), IntrResult::NoIntr);
    }
}
