mod access;
mod change_number;
mod cookie;
mod persistent;
