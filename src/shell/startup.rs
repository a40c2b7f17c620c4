/// Lines written to every newly opened shell: route `clear` through the
/// clear sentinel, keep history deduplicated and flushed after each prompt,
/// and expose `$HISTFILE` as `.pisth_history` for history retrieval.
pub const STARTUP_SCRIPT: [&str; 5] = [
    "alias clear='echo Cl\\EaRtHeScReEnNoW'",
    "export HISTCONTROL=ignoredups:erasedups",
    "shopt -s histappend",
    "export PROMPT_COMMAND=\"${PROMPT_COMMAND:+$PROMPT_COMMAND$'\\n'}history -a; history -c; history -r\"",
    "ln -s $HISTFILE .pisth_history",
];
