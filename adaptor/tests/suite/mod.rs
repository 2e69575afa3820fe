mod cli;
mod faults;
